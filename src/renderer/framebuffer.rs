//! Front/back resource pairs.

/// Two physical resources, one written this frame ("front") and one read
/// as history ("back"). Swapping flips which is which.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoubleBuffer {
    front: usize,
}

impl DoubleBuffer {
    pub fn front(&self) -> usize {
        self.front
    }

    pub fn back(&self) -> usize {
        1 - self.front
    }

    pub fn swap(&mut self) {
        self.front = 1 - self.front;
    }

    pub fn reset(&mut self) {
        self.front = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_and_back_never_alias() {
        let mut b = DoubleBuffer::default();
        for _ in 0..3 {
            assert_ne!(b.front(), b.back());
            b.swap();
        }
        assert_eq!(b.front(), 1);
        b.reset();
        assert_eq!(b.front(), 0);
    }
}
