use std::time::SystemTime;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

// A frozen (Instant, SystemTime) pair. All engine time arrives as Instant
// from the caller, but ticket issue times must be wall clock seconds so they
// survive being handed to a different process.
static BEGINNING_OF_TIME: Lazy<(Instant, SystemTime)> = Lazy::new(|| {
    let now = Instant::now();
    let now_sys = SystemTime::now();

    // Find an Instant up to an hour back so earlier instants handed in by
    // the caller still map forward.
    let mut secs = 3600;
    let beginning = loop {
        if let Some(v) = now.checked_sub(Duration::from_secs(secs)) {
            break v;
        }
        secs /= 2;
        if secs == 0 {
            break now;
        }
    };

    (beginning, now_sys - (now - beginning))
});

pub trait InstantExt {
    /// Wall clock seconds since the unix epoch for this instant.
    fn to_unix_secs(&self) -> u64;
}

impl InstantExt for Instant {
    fn to_unix_secs(&self) -> u64 {
        let (base, base_sys) = *BEGINNING_OF_TIME;
        let sys = if *self >= base {
            base_sys + self.duration_since(base)
        } else {
            warn!("Instant before beginning of time");
            base_sys - base.duration_since(*self)
        };

        sys.duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_with_instant() {
        let now = Instant::now();
        let a = now.to_unix_secs();
        let b = (now + Duration::from_secs(7200)).to_unix_secs();
        assert!(b >= a + 7199 && b <= a + 7201);
    }
}
