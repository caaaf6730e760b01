use super::Backend;

/// Input held in an owned buffer.
#[derive(Debug)]
pub struct Memory {
    data: Vec<u8>,
}

impl Memory {
    /// Wraps `data`.
    #[must_use]
    pub fn new(data: Vec<u8>) -> Memory {
        Memory { data }
    }
}

impl Backend for Memory {
    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_slice_bounds() {
        let memory = Memory::new(vec![1, 2, 3, 4]);
        assert_eq!(memory.len(), 4);
        assert_eq!(memory.data_slice(1, 2).unwrap(), &[2, 3]);
        assert!(memory.data_slice(3, 2).is_err());
        assert!(memory.data_slice(usize::MAX, 2).is_err());
        assert!(Memory::new(Vec::new()).is_empty());
    }
}
