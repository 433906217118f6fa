use xlat_core::op::LifeData;
use xlat_core::temp::TempKind;
use xlat_core::{Context, OpFlags, Opcode, CALL_NO_RWG, OPCODE_DEFS};

/// Perform backward liveness analysis over the IR ops in `ctx`.
///
/// Sets `LifeData` on each op indicating which arguments are dead
/// after the op and which outputs must be written back to memory.
/// Ops without side effects whose outputs are all dead are turned
/// into `nop`.
pub fn liveness_analysis(ctx: &mut Context) {
    let nb_temps = ctx.nb_temps() as usize;
    let nb_globals = ctx.nb_globals() as usize;
    let kinds: Vec<TempKind> = ctx.temps().iter().map(|t| t.kind).collect();

    // temp_state[i] = true means temp i is live
    let mut temp_state = vec![false; nb_temps];

    // At end of TB, all globals are live
    mark_globals_live(&mut temp_state, nb_globals);

    for oi in (0..ctx.num_ops()).rev() {
        let op = ctx.ops()[oi].clone();
        let def = &OPCODE_DEFS[op.opc as usize];
        let flags = def.flags;

        if op.opc == Opcode::Nop || op.opc == Opcode::InsnStart {
            continue;
        }

        if flags.contains(OpFlags::BB_END) {
            mark_globals_live(&mut temp_state, nb_globals);
            for (i, s) in temp_state.iter_mut().enumerate() {
                match kinds[i] {
                    TempKind::Tb => *s = true,
                    // An EBB continues on the fall-through path of a
                    // conditional branch only.
                    TempKind::Ebb if !flags.contains(OpFlags::COND_BRANCH) => {
                        *s = false
                    }
                    _ => {}
                }
            }
        }

        let nb_oargs = def.nb_oargs as usize;
        let nb_iargs = def.nb_iargs as usize;

        if op.opc == Opcode::Discard {
            let t = op.args[0].0 as usize;
            temp_state[t] = false;
            continue;
        }

        // Dead code: pure op whose results nobody reads.
        let removable = nb_oargs > 0
            && !flags.contains(OpFlags::SIDE_EFFECTS)
            && !flags.contains(OpFlags::BB_END)
            && !flags.contains(OpFlags::CALL_CLOBBER)
            && op.oargs().iter().all(|&t| {
                let i = t.0 as usize;
                !temp_state[i] && kinds[i] != TempKind::Fixed
            });
        if removable {
            let op_mut = ctx.op_mut(op.idx);
            op_mut.opc = Opcode::Nop;
            op_mut.nargs = 0;
            op_mut.life = LifeData(0);
            continue;
        }

        let mut life = LifeData(0);

        for i in 0..nb_oargs {
            let tidx = op.args[i].0 as usize;
            if !temp_state[tidx] {
                life.set_dead(i as u32);
                if kinds[tidx] == TempKind::Global {
                    life.set_sync(i as u32);
                }
            }
            temp_state[tidx] = false;
        }

        // Ops that may fault or call out observe the globals in memory.
        let observes_globals = flags.contains(OpFlags::SIDE_EFFECTS)
            || (op.opc == Opcode::Call && op.carg(1) & CALL_NO_RWG == 0);
        if observes_globals {
            mark_globals_live(&mut temp_state, nb_globals);
        }

        for i in 0..nb_iargs {
            let arg_pos = nb_oargs + i;
            let tidx = op.args[arg_pos].0 as usize;
            if !temp_state[tidx] {
                life.set_dead(arg_pos as u32);
            }
            temp_state[tidx] = true;
        }

        ctx.op_mut(op.idx).life = life;
    }
}

fn mark_globals_live(temp_state: &mut [bool], nb_globals: usize) {
    for s in temp_state.iter_mut().take(nb_globals) {
        *s = true;
    }
}
