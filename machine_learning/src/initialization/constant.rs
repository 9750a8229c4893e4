use super::ParamGen;

/// A parameter generator that always yields the same value, up to a limit.
pub struct ConstParamGen {
    value: f32,
    remaining: usize,
}

impl ConstParamGen {
    /// Creates a new `ConstParamGen`.
    ///
    /// # Arguments
    /// * `value` - The value to generate.
    /// * `limit` - How many values may be generated in total.
    pub fn new(value: f32, limit: usize) -> Self {
        Self {
            value,
            remaining: limit,
        }
    }

    /// A generator of `limit` zeros, used for biases and norm shifts.
    pub fn zeros(limit: usize) -> Self {
        Self::new(0., limit)
    }

    /// A generator of `limit` ones, used for norm scales.
    pub fn ones(limit: usize) -> Self {
        Self::new(1., limit)
    }
}

impl ParamGen for ConstParamGen {
    fn sample(&mut self, n: usize) -> Option<Vec<f32>> {
        if self.remaining == 0 {
            return None;
        }

        let n = n.min(self.remaining);
        self.remaining -= n;
        Some(vec![self.value; n])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_after_limit() {
        let mut param_gen = ConstParamGen::new(2., 10);

        assert_eq!(param_gen.sample(7).unwrap(), vec![2.; 7]);
        assert_eq!(param_gen.sample(7).unwrap(), vec![2.; 3]);
        assert!(param_gen.sample(1).is_none());
    }

    #[test]
    fn fill_reports_shortage() {
        let mut out = [0.; 4];
        assert!(ConstParamGen::ones(4).fill(&mut out).is_ok());
        assert_eq!(out, [1.; 4]);

        assert!(ConstParamGen::zeros(3).fill(&mut out).is_err());
    }
}
