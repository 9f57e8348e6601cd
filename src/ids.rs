//! Record identifier generation
//!
//! Every record kind carries a short, collision-resistant id with a kind
//! prefix (`cycle_1a2b3c4d`, `anom_…`, `hit_…`). Eight hex chars of entropy
//! keep ids greppable in logs while making collisions within a process
//! lifetime vanishingly unlikely.

use rand::Rng;

/// Number of random hex characters appended after the kind prefix.
const ID_HEX_CHARS: usize = 8;

/// Generate a prefixed record id, e.g. `new_id("anom")` → `anom_9f3c21ab`.
pub fn new_id(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut suffix = String::with_capacity(ID_HEX_CHARS);
    for _ in 0..ID_HEX_CHARS {
        let nibble: u8 = rng.gen_range(0..16);
        suffix.push(char::from_digit(nibble as u32, 16).unwrap_or('0'));
    }
    format!("{prefix}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_carry_prefix() {
        let id = new_id("anom");
        assert!(id.starts_with("anom_"));
        assert_eq!(id.len(), "anom_".len() + ID_HEX_CHARS);
    }

    #[test]
    fn ids_are_hex_suffixed() {
        let id = new_id("cycle");
        let suffix = &id["cycle_".len()..];
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_do_not_collide_in_small_batches() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id("hit")).collect();
        assert_eq!(ids.len(), 1000);
    }
}
