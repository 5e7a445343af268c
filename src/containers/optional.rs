/// A value that may be deliberately absent, distinct from `Option<T>` in
/// that absence is itself a recorded fact rather than a null.
///
/// Used where a field is allowed to be "not yet known" (for example a
/// tree root's generation before the owning root item has been located)
/// and that distinction needs to survive JSON round-trips as an explicit
/// `{"ok": false}` rather than a missing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Optional<T> {
    ok: bool,
    val: T,
}

impl<T: Default> Optional<T> {
    pub fn none() -> Self {
        Self {
            ok: false,
            val: T::default(),
        }
    }
}

impl<T> Optional<T> {
    pub fn some(val: T) -> Self {
        Self { ok: true, val }
    }

    pub fn is_some(&self) -> bool {
        self.ok
    }

    pub fn is_none(&self) -> bool {
        !self.ok
    }

    pub fn get(&self) -> Option<&T> {
        self.ok.then_some(&self.val)
    }

    pub fn into_option(self) -> Option<T> {
        self.ok.then_some(self.val)
    }
}

impl<T> From<Option<T>> for Optional<T>
where
    T: Default,
{
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => Self::some(v),
            None => Self::none(),
        }
    }
}
