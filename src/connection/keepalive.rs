/// Counts idle event-loop turns and says when a no-op probe is due.
///
/// One probe per keepalive period while idle: the counter starts over after
/// each probe and whenever traffic is seen.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    threshold: Option<u32>,
    idle: u32,
}

impl KeepAlive {
    /// `threshold` is the number of idle ticks per probe; `None` disables
    /// probing.
    pub fn new(threshold: Option<u32>) -> Self {
        Self {
            threshold: threshold.map(|t| t.max(1)),
            idle: 0,
        }
    }

    /// Records one turn without readiness. Returns true if a probe should be
    /// sent now.
    pub fn tick(&mut self) -> bool {
        let Some(threshold) = self.threshold else {
            return false;
        };

        self.idle += 1;
        if self.idle >= threshold {
            self.idle = 0;
            true
        } else {
            false
        }
    }

    /// Records activity on the socket.
    pub fn reset(&mut self) {
        self.idle = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_probe_before_threshold() {
        let mut keepalive = KeepAlive::new(Some(3));
        assert!(!keepalive.tick());
        assert!(!keepalive.tick());
        assert!(keepalive.tick());
    }

    #[test]
    fn test_one_probe_per_interval() {
        let mut keepalive = KeepAlive::new(Some(4));
        let probes = (0..20).filter(|_| keepalive.tick()).count();
        assert_eq!(probes, 5);
    }

    #[test]
    fn test_activity_resets() {
        let mut keepalive = KeepAlive::new(Some(2));
        assert!(!keepalive.tick());
        keepalive.reset();
        assert!(!keepalive.tick());
        assert!(keepalive.tick());
    }

    #[test]
    fn test_disabled() {
        let mut keepalive = KeepAlive::new(None);
        assert!((0..100).all(|_| !keepalive.tick()));
    }
}
