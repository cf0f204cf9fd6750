//! Rolling energy history used for adaptive thresholds

/// Fixed-capacity ring of recent energy values.
///
/// Pushing beyond capacity overwrites the oldest value, so `len()` never
/// exceeds `capacity()`.
#[derive(Debug, Clone)]
pub struct EnergyHistoryBuffer {
    values: Vec<f32>,
    write_pos: usize,
    len: usize,
    capacity: usize,
}

impl EnergyHistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
            capacity,
        }
    }

    pub fn push(&mut self, value: f32) {
        let value = if value.is_finite() { value } else { 0.0 };
        self.values[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.len < self.capacity {
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    /// Values from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        let start = (self.write_pos + self.capacity - self.len) % self.capacity;
        (0..self.len).map(move |i| self.values[(start + i) % self.capacity])
    }

    /// The newest `count` values (fewer if not yet filled), oldest first.
    pub fn iter_latest(&self, count: usize) -> impl Iterator<Item = f32> + '_ {
        let count = count.min(self.len);
        let start = (self.write_pos + self.capacity - count) % self.capacity;
        (0..count).map(move |i| self.values[(start + i) % self.capacity])
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.iter().collect()
    }

    pub fn mean(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        self.iter().sum::<f32>() / self.len as f32
    }

    /// Population standard deviation.
    pub fn std_dev(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let mean = self.mean();
        let var = self
            .iter()
            .map(|v| {
                let d = v - mean;
                d * d
            })
            .sum::<f32>()
            / self.len as f32;
        var.sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_values_in_order() {
        let mut history = EnergyHistoryBuffer::new(32);
        for i in 0..40 {
            history.push(i as f32);
        }

        assert_eq!(history.len(), 32);
        let expected: Vec<f32> = (8..40).map(|i| i as f32).collect();
        assert_eq!(history.to_vec(), expected);
    }

    #[test]
    fn partial_fill_reads_in_push_order() {
        let mut history = EnergyHistoryBuffer::new(8);
        history.push(0.1);
        history.push(0.2);
        history.push(0.3);

        assert_eq!(history.to_vec(), vec![0.1, 0.2, 0.3]);
        assert!((history.mean() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn iter_latest_reads_the_tail_across_the_wrap() {
        let mut history = EnergyHistoryBuffer::new(5);
        for i in 1..=7 {
            history.push(i as f32);
        }

        let tail: Vec<f32> = history.iter_latest(3).collect();
        assert_eq!(tail, vec![5.0, 6.0, 7.0]);
        assert_eq!(history.iter_latest(99).count(), 5);

        history.clear();
        assert_eq!(history.iter_latest(3).count(), 0);
    }

    #[test]
    fn std_dev_of_constant_history_is_zero() {
        let mut history = EnergyHistoryBuffer::new(4);
        for _ in 0..10 {
            history.push(0.5);
        }
        assert_eq!(history.std_dev(), 0.0);
        assert_eq!(history.len(), 4);
    }

    #[test]
    fn non_finite_values_are_stored_as_zero() {
        let mut history = EnergyHistoryBuffer::new(4);
        history.push(f32::NAN);
        history.push(f32::INFINITY);
        assert_eq!(history.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn clear_empties_the_ring() {
        let mut history = EnergyHistoryBuffer::new(4);
        history.push(1.0);
        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.mean(), 0.0);
    }
}
