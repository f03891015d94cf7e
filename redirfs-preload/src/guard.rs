use std::cell::Cell;

thread_local! {
    static ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running inside the layer.
///
/// Anything the layer itself calls that lands back on an exported symbol
/// (the backend's own file I/O, log output, config reads) sees the guard held
/// and goes straight to the native definition.
pub(crate) struct Guard(());

impl Guard {
    /// `None` when the thread is already inside the layer, or when its
    /// thread-local storage is being torn down.
    pub(crate) fn enter() -> Option<Self> {
        ACTIVE
            .try_with(|active| {
                if active.get() {
                    None
                } else {
                    active.set(true);
                    Some(Guard(()))
                }
            })
            .ok()
            .flatten()
    }
}

impl Drop for Guard {
    fn drop(&mut self) {
        let _ = ACTIVE.try_with(|active| active.set(false));
    }
}
