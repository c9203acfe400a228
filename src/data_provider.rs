//! Slot storage abstractions shared by the ring and the unbounded buffer.

/// Produces the pre-allocated instance placed in every slot at construction.
///
/// Producers overwrite slots in place instead of allocating per event.
pub trait EventFactory<E>: Send + Sync {
    fn new_instance(&self) -> E;
}

impl<E, F> EventFactory<E> for F
where
    F: Fn() -> E + Send + Sync,
{
    fn new_instance(&self) -> E {
        self()
    }
}

/// Maps a sequence onto the slot that stores it.
pub trait DataProvider<E> {
    /// Raw pointer to the slot holding `sequence`.
    ///
    /// Calling this is safe; dereferencing is only sound for the producer that
    /// claimed `sequence` and has not yet published it, or for a consumer whose
    /// barrier reported `sequence` as available and that has not yet released it.
    fn slot(&self, sequence: i64) -> *mut E;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closures_are_factories() {
        let factory = || vec![0u8; 4];
        assert_eq!(factory.new_instance().len(), 4);

        let boxed: Box<dyn EventFactory<String>> = Box::new(|| String::from("slot"));
        assert_eq!(boxed.new_instance(), "slot");
    }
}
