//! Default names for apparatus and protocols.
//!
//! There is no global counter: whoever builds several protocols owns an
//! allocator and draws names from it.

/// Hands out `Prefix_0`, `Prefix_1`, ...
#[derive(Debug, Clone)]
pub struct NameAllocator {
    prefix: String,
    next: usize,
}

impl NameAllocator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    pub fn for_protocols() -> Self {
        Self::new("Protocol")
    }

    pub fn for_apparatus() -> Self {
        Self::new("Apparatus")
    }

    pub fn next_name(&mut self) -> String {
        let name = format!("{}_{}", self.prefix, self.next);
        self.next += 1;
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocators_are_independent() {
        let mut protocols = NameAllocator::for_protocols();
        let mut other = NameAllocator::for_protocols();
        assert_eq!(protocols.next_name(), "Protocol_0");
        assert_eq!(protocols.next_name(), "Protocol_1");
        assert_eq!(other.next_name(), "Protocol_0");
        assert_eq!(NameAllocator::for_apparatus().next_name(), "Apparatus_0");
    }
}
