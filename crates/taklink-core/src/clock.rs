//! Wall-clock helpers. Logic modules take `now` as a parameter; only the
//! daemon loops read the clock.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_secs() -> i64 {
    unix_millis() / 1000
}

pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_and_secs_agree() {
        let secs = unix_secs();
        let millis = unix_millis();
        assert!((millis / 1000 - secs).abs() <= 1);
        assert!(secs > 1_700_000_000); // post-2023 clock
    }
}
