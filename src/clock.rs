use tracing::debug;

pub trait ClockSource {
    fn frequency_hz(&self) -> u64;
}

pub struct Clock {
    name: String,
    hz: u64,
}

impl Clock {
    pub fn new(name: &str) -> Self {
        Clock {
            name: name.to_string(),
            hz: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_hz(&mut self, hz: u64) {
        debug!("[CLOCK] {} set to {} Hz", self.name, hz);
        self.hz = hz;
    }
}

impl ClockSource for Clock {
    fn frequency_hz(&self) -> u64 {
        self.hz
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_clock_is_stopped() {
        let clk = Clock::new("SYSCLK");
        assert_eq!(clk.frequency_hz(), 0);
    }

    #[test]
    fn set_hz_is_read_back() {
        let mut clk = Clock::new("SYSCLK");
        clk.set_hz(320_000_000);
        assert_eq!(clk.frequency_hz(), 320_000_000);
        assert_eq!(clk.name(), "SYSCLK");
    }
}
