use num_traits::float::Float;

/// Linear map from a measured voltage range to a physical unit range.
/// The output range may be inverted (out_min > out_max).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearScale {
    pub in_min: f32,
    pub in_max: f32,
    pub out_min: f32,
    pub out_max: f32,
}

impl LinearScale {
    pub const fn new(in_min: f32, in_max: f32, out_min: f32, out_max: f32) -> LinearScale {
        LinearScale { in_min, in_max, out_min, out_max }
    }

    pub fn apply(&self, x: f32) -> f32 {
        (x - self.in_min) * (self.out_max - self.out_min) / (self.in_max - self.in_min) + self.out_min
    }
}

pub struct RingArray<T: Float, const N: usize> {
    tail: usize,  // Index of the most recently added element
    data: [T; N], // Array containing the data.
}

impl<T: Float, const N: usize> RingArray<T, N> {
    /// Creates a new RingArray of length `N` initialized to zero.
    pub fn new() -> Self {
        Self {
            tail: N - 1,           // raw index to the last element
            data: [T::zero(); N],
        }
    }

    /// Pushes an element at the end (tail).  Head element is popped off and returned
    pub fn push(&mut self, x: T) -> T {
        let head_index = self.circular_index(self.tail + 1); // Head index always follows the tail index
        let head_value = self.data[head_index];
        self.data[head_index] = x;
        self.tail = head_index;
        head_value
    }

    /// Overwrites every element with `x`
    pub fn fill(&mut self, x: T) {
        self.data = [x; N];
    }

    fn circular_index(&self, i: usize) -> usize {
        i % N
    }
}

impl<T: Float, const N: usize> Default for RingArray<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct MovingAverageFilter<T: Float, const N: usize> {
    ring_array: RingArray<T, N>,
    sum: T,
    length: T,
}

impl<T: Float, const N: usize> MovingAverageFilter<T, N> {
    pub fn new() -> MovingAverageFilter<T, N> {
        Self {
            ring_array: RingArray::<T, N>::new(),
            sum: T::zero(),
            length: T::from(N).unwrap_or_else(T::one),
        }
    }

    pub fn push(&mut self, input: T) -> T {
        // Push the input and pop the head.
        let head = self.ring_array.push(input);

        // Add input to the sum and subtract the head
        self.sum = self.sum + input - head;

        self.sum / self.length
    }

    /// Primes the window with `x`, so the output starts at `x` instead of
    /// ramping up from zero.
    pub fn fill(&mut self, x: T) -> T {
        self.ring_array.fill(x);
        self.sum = x * self.length;
        x
    }
}

impl<T: Float, const N: usize> Default for MovingAverageFilter<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Running maximum, taken and reset once per breath.
#[derive(Debug, Copy, Clone, Default)]
pub struct PeakDetector {
    peak: Option<f32>,
}

impl PeakDetector {
    pub fn push(&mut self, x: f32) {
        self.peak = Some(match self.peak {
            Some(p) if p >= x => p,
            _ => x,
        });
    }

    pub fn take(&mut self) -> Option<f32> {
        self.peak.take()
    }
}

/// Running mean (sum + count), taken and reset once per breath.
#[derive(Debug, Copy, Clone, Default)]
pub struct MeanAccumulator {
    sum: f32,
    count: u32,
}

impl MeanAccumulator {
    pub fn push(&mut self, x: f32) {
        self.sum += x;
        self.count += 1;
    }

    pub fn take(&mut self) -> Option<f32> {
        let mean = if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f32)
        };
        *self = MeanAccumulator::default();
        mean
    }
}
