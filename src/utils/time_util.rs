use serde::{Deserialize, Serialize};
use std::time::{self, Duration, SystemTime, UNIX_EPOCH};

use crate::fs::FsError;

/// a point in time as seconds and nanoseconds since [UNIX_EPOCH],
/// stored inline in inode records and the superblock
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// seconds
    pub sec: u64,
    /// fraction of a second in nanoseconds
    pub nsec: u32,
}

impl Timestamp {
    pub const fn new(sec: u64, nsec: u32) -> Self {
        Timestamp { sec, nsec }
    }
}

/// calculate what time is it since `1970-1-1 00:00:00`,named as [UNIX_EPOCH]
pub fn now() -> Timestamp {
    // a clock set before 1970 reads as the epoch itself
    let now = SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .unwrap_or_default();
    Timestamp {
        sec: now.as_secs(),
        nsec: now.subsec_nanos(),
    }
}

impl From<Timestamp> for SystemTime {
    fn from(value: Timestamp) -> Self {
        let duration = Duration::new(value.sec, value.nsec);
        UNIX_EPOCH + duration
    }
}

impl TryFrom<SystemTime> for Timestamp {
    type Error = FsError;
    fn try_from(value: SystemTime) -> Result<Self, Self::Error> {
        match value.duration_since(UNIX_EPOCH) {
            Ok(duration) => Ok(Timestamp {
                sec: duration.as_secs(),
                nsec: duration.subsec_nanos(),
            }),
            Err(before_epoch_error) => Err(FsError::InvalidArgument(format!(
                "doesn't support time before UNIX_EPOCH: {before_epoch_error}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_conversion() {
        let ts = Timestamp::new(1_700_000_000, 123);
        let system: SystemTime = ts.into();
        assert_eq!(Timestamp::try_from(system).unwrap(), ts);
    }

    #[test]
    fn test_before_epoch_is_rejected() {
        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert!(matches!(
            Timestamp::try_from(before),
            Err(FsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_now_is_after_epoch() {
        assert!(now() > Timestamp::default());
    }
}
