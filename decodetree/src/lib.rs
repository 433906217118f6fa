//! Decoder generator for fixed-width instruction sets.
//!
//! The input language describes fields, argument sets, formats and
//! patterns:
//!
//! ```text
//! %imm_b   31:s1 7:1 25:6 8:4 !function=shl_1   # field from bit segments
//! &b       rs1 rs2 imm                          # argument set
//! @b       ....... ..... ..... ... ..... ....... &b imm=%imm_b %rs1 %rs2
//! beq      ....... ..... ..... 000 ..... 1100011 @b
//! ```
//!
//! Bit tokens use `0`/`1` for fixed bits and `.`/`-` for don't-care,
//! most significant bit first. A segment `pos:len` takes `len` bits
//! starting at bit `pos`; `pos:slen` sign-extends. Segments are
//! concatenated first to last. `!function=shl_N` shifts the result left.
//!
//! [`generate`] emits one `Args*` struct per argument set, an
//! `extract_*` function per field, a `Decode<Ir>` trait with one
//! `trans_*` method per pattern and a `decode` function that dispatches
//! on the first matching pattern.

use std::collections::BTreeMap;
use std::io::{self, Write};

use thiserror::Error;

/// Instruction width handled by the generator.
pub const INSN_BITS: u32 = 32;

#[derive(Debug, Error)]
pub enum DecodeTreeError {
    #[error("line {line}: {msg}")]
    Syntax { line: usize, msg: String },
    #[error("pattern `{pattern}` leaves argument `{arg}` without a source")]
    MissingSource { pattern: String, arg: String },
    #[error("patterns `{0}` and `{1}` match the same encodings")]
    Overlap(String, String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, DecodeTreeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub pos: u32,
    pub len: u32,
    pub signed: bool,
}

impl Segment {
    fn extract(&self, insn: u32) -> i64 {
        if self.signed {
            (((insn << (INSN_BITS - self.pos - self.len)) as i32) >> (INSN_BITS - self.len)) as i64
        } else {
            ((insn >> self.pos) & mask(self.len)) as i64
        }
    }

    fn expr(&self) -> String {
        if self.signed {
            format!(
                "((((insn << {}) as i32) >> {}) as i64)",
                INSN_BITS - self.pos - self.len,
                INSN_BITS - self.len
            )
        } else {
            format!("(((insn >> {}) & {:#x}) as i64)", self.pos, mask(self.len))
        }
    }
}

fn mask(len: u32) -> u32 {
    if len >= 32 {
        u32::MAX
    } else {
        (1 << len) - 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub segments: Vec<Segment>,
    pub shift: u32,
}

impl Field {
    /// Value of the field in `insn`, as the generated extractor computes it.
    pub fn extract(&self, insn: u32) -> i64 {
        let v = self.segments[1..]
            .iter()
            .fold(self.segments[0].extract(insn), |acc, s| (acc << s.len) | s.extract(insn));
        v << self.shift
    }

    fn expr(&self) -> String {
        let mut e = self.segments[0].expr();
        for s in &self.segments[1..] {
            e = format!("(({e} << {}) | {})", s.len, s.expr());
        }
        if self.shift != 0 {
            e = format!("({e} << {})", self.shift);
        }
        e
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSet {
    pub name: String,
    pub fields: Vec<String>,
}

impl ArgSet {
    fn type_name(&self) -> String {
        format!("Args{}", camel(&self.name))
    }
}

/// Where an argument's value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Field(String),
    Const(i64),
}

#[derive(Debug, Clone, Default)]
struct Format {
    mask: u32,
    bits: u32,
    args: Option<String>,
    sources: BTreeMap<String, Source>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub name: String,
    pub mask: u32,
    pub bits: u32,
    pub args: String,
    pub sources: BTreeMap<String, Source>,
}

impl Pattern {
    pub fn matches(&self, insn: u32) -> bool {
        insn & self.mask == self.bits
    }

    fn overlaps(&self, other: &Pattern) -> bool {
        (self.bits ^ other.bits) & self.mask & other.mask == 0
    }
}

/// A parsed decoder description.
#[derive(Debug, Default)]
pub struct DecodeSpec {
    pub fields: BTreeMap<String, Field>,
    pub argsets: BTreeMap<String, ArgSet>,
    pub patterns: Vec<Pattern>,
    formats: BTreeMap<String, Format>,
}

impl DecodeSpec {
    pub fn parse(input: &str) -> Result<Self> {
        let mut spec = DecodeSpec::default();
        for (line, text) in logical_lines(input) {
            let err = |msg: String| DecodeTreeError::Syntax { line, msg };
            let tokens: Vec<&str> = text.split_whitespace().collect();
            let Some(&head) = tokens.first() else {
                continue;
            };
            let rest = &tokens[1..];
            if let Some(name) = head.strip_prefix('%') {
                let field = parse_field(name, rest).map_err(err)?;
                spec.fields.insert(field.name.clone(), field);
            } else if let Some(name) = head.strip_prefix('&') {
                let fields = rest.iter().map(|s| s.to_string()).collect();
                spec.argsets.insert(name.to_string(), ArgSet { name: name.to_string(), fields });
            } else if let Some(name) = head.strip_prefix('@') {
                let fmt = spec.parse_format(rest).map_err(err)?;
                spec.formats.insert(name.to_string(), fmt);
            } else {
                let pat = spec.parse_pattern(head, rest).map_err(err)?;
                spec.patterns.push(pat);
            }
        }
        spec.check()?;
        Ok(spec)
    }

    fn parse_format(&self, tokens: &[&str]) -> std::result::Result<Format, String> {
        let (mask, bits, attrs) = parse_bits(tokens)?;
        let mut fmt = Format { mask, bits, ..Format::default() };
        self.apply_attrs(&mut fmt, attrs)?;
        Ok(fmt)
    }

    fn parse_pattern(&self, name: &str, tokens: &[&str]) -> std::result::Result<Pattern, String> {
        let (mask, bits, attrs) = parse_bits(tokens)?;
        let mut fmt = Format::default();
        self.apply_attrs(&mut fmt, attrs)?;
        let args = fmt.args.ok_or_else(|| format!("pattern `{name}` names no argument set"))?;
        Ok(Pattern {
            name: name.to_string(),
            mask: mask | fmt.mask,
            bits: bits | fmt.bits,
            args,
            sources: fmt.sources,
        })
    }

    /// Fold `&set`, `@format`, `%field`, `name=%field` and `name=N`
    /// into `fmt`. Later attributes override earlier ones.
    fn apply_attrs(&self, fmt: &mut Format, attrs: &[&str]) -> std::result::Result<(), String> {
        for &tok in attrs {
            if let Some(set) = tok.strip_prefix('&') {
                if !self.argsets.contains_key(set) {
                    return Err(format!("unknown argument set `&{set}`"));
                }
                fmt.args = Some(set.to_string());
            } else if let Some(name) = tok.strip_prefix('@') {
                let base = self.formats.get(name).ok_or_else(|| format!("unknown format `@{name}`"))?;
                fmt.mask |= base.mask;
                fmt.bits |= base.bits;
                if fmt.args.is_none() {
                    fmt.args = base.args.clone();
                }
                for (k, v) in &base.sources {
                    fmt.sources.entry(k.clone()).or_insert_with(|| v.clone());
                }
            } else if let Some(field) = tok.strip_prefix('%') {
                self.field_ref(field)?;
                fmt.sources.insert(field.to_string(), Source::Field(field.to_string()));
            } else if let Some((arg, val)) = tok.split_once('=') {
                let src = match val.strip_prefix('%') {
                    Some(field) => {
                        self.field_ref(field)?;
                        Source::Field(field.to_string())
                    }
                    None => Source::Const(val.parse().map_err(|_| format!("bad constant `{tok}`"))?),
                };
                fmt.sources.insert(arg.to_string(), src);
            } else {
                return Err(format!("unexpected token `{tok}`"));
            }
        }
        Ok(())
    }

    fn field_ref(&self, name: &str) -> std::result::Result<(), String> {
        if self.fields.contains_key(name) {
            Ok(())
        } else {
            Err(format!("unknown field `%{name}`"))
        }
    }

    fn check(&self) -> Result<()> {
        for p in &self.patterns {
            for arg in &self.argsets[&p.args].fields {
                if !p.sources.contains_key(arg) {
                    return Err(DecodeTreeError::MissingSource {
                        pattern: p.name.clone(),
                        arg: arg.clone(),
                    });
                }
            }
        }
        for (i, a) in self.patterns.iter().enumerate() {
            if let Some(b) = self.patterns[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(DecodeTreeError::Overlap(a.name.clone(), b.name.clone()));
            }
        }
        Ok(())
    }

    /// The pattern `decode` would dispatch `insn` to.
    pub fn lookup(&self, insn: u32) -> Option<&Pattern> {
        self.patterns.iter().find(|p| p.matches(insn))
    }

    pub fn emit(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "// Generated by decodetree. Do not edit.\n")?;
        for set in self.argsets.values() {
            writeln!(out, "#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]")?;
            writeln!(out, "pub struct {} {{", set.type_name())?;
            for f in &set.fields {
                writeln!(out, "    pub {f}: i64,")?;
            }
            writeln!(out, "}}\n")?;
        }
        for field in self.fields.values() {
            writeln!(out, "pub fn extract_{}(insn: u32) -> i64 {{", field.name)?;
            // Every expression is wrapped in one outer pair of parens.
            let e = field.expr();
            writeln!(out, "    {}", &e[1..e.len() - 1])?;
            writeln!(out, "}}\n")?;
        }

        writeln!(out, "pub trait Decode<Ir> {{")?;
        for p in &self.patterns {
            let ty = self.argsets[&p.args].type_name();
            writeln!(out, "    fn trans_{}(&mut self, ir: &mut Ir, a: &{ty}) -> bool;", p.name)?;
        }
        writeln!(out, "}}\n")?;

        writeln!(out, "pub fn decode<Ir, T: Decode<Ir>>(ctx: &mut T, ir: &mut Ir, insn: u32) -> bool {{")?;
        for p in &self.patterns {
            let set = &self.argsets[&p.args];
            writeln!(out, "    if insn & {:#010x} == {:#010x} {{", p.mask, p.bits)?;
            write!(out, "        return ctx.trans_{}(ir, &{} {{", p.name, set.type_name())?;
            for arg in &set.fields {
                match &p.sources[arg] {
                    Source::Field(f) => write!(out, " {arg}: extract_{f}(insn),")?,
                    Source::Const(c) => write!(out, " {arg}: {c},")?,
                }
            }
            writeln!(out, " }});")?;
            writeln!(out, "    }}")?;
        }
        writeln!(out, "    false")?;
        writeln!(out, "}}")
    }
}

/// Parse `input` and write the generated decoder to `out`.
pub fn generate(input: &str, out: &mut dyn Write) -> Result<()> {
    DecodeSpec::parse(input)?.emit(out)?;
    Ok(())
}

/// Lines with comments stripped and `\` continuations joined, paired
/// with the number of the line they start on.
fn logical_lines(input: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (i, raw) in input.lines().enumerate() {
        let text = raw.split('#').next().unwrap_or("").trim_end();
        let (body, cont) = match text.strip_suffix('\\') {
            Some(b) => (b, true),
            None => (text, false),
        };
        let entry = pending.get_or_insert_with(|| (i + 1, String::new()));
        entry.1.push(' ');
        entry.1.push_str(body);
        if !cont {
            if let Some(done) = pending.take() {
                if !done.1.trim().is_empty() {
                    lines.push(done);
                }
            }
        }
    }
    lines.extend(pending);
    lines
}

fn parse_field(name: &str, tokens: &[&str]) -> std::result::Result<Field, String> {
    let mut segments = Vec::new();
    let mut shift = 0;
    for &tok in tokens {
        if let Some(func) = tok.strip_prefix("!function=") {
            shift = func
                .strip_prefix("shl_")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| format!("unsupported function `{func}`"))?;
            continue;
        }
        let (pos, len) = tok.split_once(':').ok_or_else(|| format!("bad segment `{tok}`"))?;
        let (signed, len) = match len.strip_prefix('s') {
            Some(l) => (true, l),
            None => (false, len),
        };
        let pos: u32 = pos.parse().map_err(|_| format!("bad segment `{tok}`"))?;
        let len: u32 = len.parse().map_err(|_| format!("bad segment `{tok}`"))?;
        if len == 0 || pos + len > INSN_BITS {
            return Err(format!("segment `{tok}` out of range"));
        }
        segments.push(Segment { pos, len, signed });
    }
    if segments.is_empty() {
        return Err(format!("field `%{name}` has no segments"));
    }
    Ok(Field { name: name.to_string(), segments, shift })
}

/// Consume leading bit tokens. Returns the fixed-bit mask and value and
/// the remaining attribute tokens.
fn parse_bits<'a, 'b>(tokens: &'b [&'a str]) -> std::result::Result<(u32, u32, &'b [&'a str]), String> {
    let n = tokens
        .iter()
        .take_while(|t| t.chars().all(|c| matches!(c, '0' | '1' | '.' | '-')))
        .count();
    let (mut mask, mut bits, mut width) = (0u32, 0u32, 0u32);
    for c in tokens[..n].iter().flat_map(|t| t.chars()) {
        mask <<= 1;
        bits <<= 1;
        match c {
            '0' => mask |= 1,
            '1' => {
                mask |= 1;
                bits |= 1;
            }
            _ => {}
        }
        width += 1;
    }
    if width != INSN_BITS {
        return Err(format!("bit pattern is {width} bits wide, expected {INSN_BITS}"));
    }
    Ok((mask, bits, &tokens[n..]))
}

fn camel(s: &str) -> String {
    s.split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut c = p.chars();
            match c.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + c.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
