use std::fmt::Display;

/// Running min / max / average over integer samples.
#[derive(Clone, Debug, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub min: usize,
    pub max: usize,
    pub avg: f32,
}

impl Stats {
    pub fn add_sample(&mut self, value: usize) {
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.avg += (value as f32 - self.avg) / (self.count as f32);
    }

    pub fn add_samples(&mut self, values: impl IntoIterator<Item = usize>) {
        for value in values {
            self.add_sample(value);
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            count: 0,
            min: usize::MAX,
            max: 0,
            avg: 0.0,
        }
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - {}; avg {:.1}; {} samples",
            self.min, self.max, self.avg, self.count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::assert;

    #[test]
    fn add_sample() {
        let mut s = Stats::default();
        s.add_sample(20);
        assert!(s.count == 1);
        assert!(s.min == 20);
        assert!(s.max == 20);
        assert!(s.avg == 20.0);
    }

    #[test]
    fn add_samples() {
        let mut s = Stats::default();
        s.add_samples([4, 1, 7]);
        assert!(s.count == 3);
        assert!(s.min == 1);
        assert!(s.max == 7);
        assert!(s.avg == 4.0);
    }

    #[test]
    fn display_format() {
        let mut s = Stats::default();
        s.add_sample(42);
        let output = format!("{}", s);
        assert!(output.contains("42 - 42"));
        assert!(output.contains("avg 42.0"));
        assert!(output.contains("1 samples"));
    }
}
