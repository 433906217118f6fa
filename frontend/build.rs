use std::env;
use std::error::Error;
use std::fs;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let decode_file = Path::new("decode/riscv64.decode");
    println!("cargo::rerun-if-changed={}", decode_file.display());

    let input = fs::read_to_string(decode_file)?;
    let mut output = Vec::new();
    decodetree::generate(&input, &mut output)?;

    let out_path = Path::new(&env::var("OUT_DIR")?).join("riscv64_decode.rs");
    fs::write(out_path, output)?;
    Ok(())
}
