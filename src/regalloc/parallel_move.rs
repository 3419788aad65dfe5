use crate::ir::{Reg, SpillMove};
use std::collections::BTreeMap;

/// Sequence a set of simultaneous register copies
///
/// A copy can be done as soon as no other pending copy still reads its destination. When only
/// cycles are left, the smallest destination is saved into `temp` and its readers read from
/// there instead. Returns the copies in order, and whether `temp` was needed.
pub fn schedule_parallel_moves(moves: &[SpillMove], temp: Reg) -> (Vec<SpillMove>, bool) {
    let mut pending: BTreeMap<Reg, Reg> = BTreeMap::new();
    for spill in moves {
        if spill.dst != spill.src {
            let previous = pending.insert(spill.dst, spill.src);
            debug_assert!(previous.is_none(), "two copies into {}", spill.dst);
        }
    }

    let mut scheduled = vec![];
    let mut used_temp = false;
    while !pending.is_empty() {
        loop {
            let ready = pending
                .keys()
                .copied()
                .find(|dst| !pending.values().any(|src| src == dst));
            match ready {
                Some(dst) => {
                    if let Some(src) = pending.remove(&dst) {
                        scheduled.push(SpillMove { dst, src });
                    }
                }
                None => break,
            }
        }

        let blocked = match pending.keys().next() {
            Some(dst) => *dst,
            None => break,
        };
        debug_assert_ne!(blocked, temp);
        scheduled.push(SpillMove {
            dst: temp,
            src: blocked,
        });
        used_temp = true;
        for src in pending.values_mut() {
            if *src == blocked {
                *src = temp;
            }
        }
    }

    (scheduled, used_temp)
}

#[cfg(test)]
mod test {
    use super::*;

    fn mv(dst: Reg, src: Reg) -> SpillMove {
        SpillMove { dst, src }
    }

    fn run(moves: &[SpillMove], regs: &mut [i32]) -> bool {
        let (scheduled, used_temp) = schedule_parallel_moves(moves, (regs.len() - 1) as Reg);
        for spill in scheduled {
            regs[spill.dst as usize] = regs[spill.src as usize];
        }
        used_temp
    }

    #[test]
    fn swap() {
        let mut regs = [10, 20, 0];
        assert!(run(&[mv(0, 1), mv(1, 0)], &mut regs));
        assert_eq!(&regs[..2], &[20, 10]);
    }

    #[test]
    fn three_cycle() {
        let mut regs = [10, 20, 30, 0];
        run(&[mv(0, 1), mv(1, 2), mv(2, 0)], &mut regs);
        assert_eq!(&regs[..3], &[20, 30, 10]);
    }

    #[test]
    fn shared_source_and_chain() {
        // a <- b, b <- c, c <- b, d <- d
        let mut regs = [1, 2, 3, 4, 0];
        run(&[mv(0, 1), mv(1, 2), mv(2, 1), mv(3, 3)], &mut regs);
        assert_eq!(&regs[..4], &[2, 3, 2, 4]);
    }

    #[test]
    fn no_cycle_needs_no_temp() {
        let mut regs = [1, 2, 3, 0];
        assert!(!run(&[mv(0, 1), mv(1, 2)], &mut regs));
        assert_eq!(&regs[..3], &[2, 3, 3]);
    }
}
