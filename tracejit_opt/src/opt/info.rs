//! Facts about reference boxes.

/// What is known about whether a reference is NULL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Nullness {
    #[default]
    Unknown,
    NonNull,
    Null,
}

/// Knowledge attached to a reference box.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtrInfo {
    nullness: Nullness,
    known_class: Option<u64>,
    type_id: Option<u32>,
    /// Known to be an instance (has a class).
    is_object: bool,
    /// The exact allocation is known.
    precise: bool,
    /// Position of the emitted guard that established non-nullness or the
    /// class, while it can still be strengthened in place.
    last_guard_pos: Option<usize>,
}

impl PtrInfo {
    pub fn null() -> Self {
        Self {
            nullness: Nullness::Null,
            ..Self::default()
        }
    }

    pub fn nonnull() -> Self {
        Self {
            nullness: Nullness::NonNull,
            ..Self::default()
        }
    }

    /// Info for a freshly allocated object.
    pub fn allocation(type_id: u32, vtable: Option<u64>) -> Self {
        Self {
            nullness: Nullness::NonNull,
            known_class: vtable,
            type_id: Some(type_id),
            is_object: vtable.is_some(),
            precise: true,
            last_guard_pos: None,
        }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.nullness == Nullness::Null
    }

    #[inline]
    pub fn is_nonnull(&self) -> bool {
        self.nullness == Nullness::NonNull
    }

    #[inline]
    pub fn nullness(&self) -> Nullness {
        self.nullness
    }

    #[inline]
    pub fn known_class(&self) -> Option<u64> {
        self.known_class
    }

    #[inline]
    pub fn type_id(&self) -> Option<u32> {
        self.type_id
    }

    #[inline]
    pub fn is_about_object(&self) -> bool {
        self.is_object
    }

    #[inline]
    pub fn is_precise(&self) -> bool {
        self.precise
    }

    #[inline]
    pub fn last_guard_pos(&self) -> Option<usize> {
        self.last_guard_pos
    }

    pub fn mark_nonnull(&mut self) {
        self.nullness = Nullness::NonNull;
    }

    /// Record the exact class; implies non-null.
    pub fn set_class(&mut self, class: u64) {
        self.known_class = Some(class);
        self.is_object = true;
        self.nullness = Nullness::NonNull;
    }

    pub fn mark_last_guard(&mut self, pos: usize) {
        self.last_guard_pos = Some(pos);
    }

    pub fn reset_last_guard_pos(&mut self) {
        self.last_guard_pos = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_unknown() {
        let info = PtrInfo::default();
        assert!(!info.is_null());
        assert!(!info.is_nonnull());
        assert_eq!(info.known_class(), None);
    }

    #[test]
    fn test_set_class_implies_nonnull() {
        let mut info = PtrInfo::default();
        info.set_class(0x40);
        assert!(info.is_nonnull());
        assert!(info.is_about_object());
        assert_eq!(info.known_class(), Some(0x40));
    }

    #[test]
    fn test_allocation_is_precise() {
        let info = PtrInfo::allocation(7, None);
        assert!(info.is_precise());
        assert!(!info.is_about_object());
        assert_eq!(info.type_id(), Some(7));
    }

    #[test]
    fn test_last_guard_pos() {
        let mut info = PtrInfo::nonnull();
        info.mark_last_guard(3);
        assert_eq!(info.last_guard_pos(), Some(3));
        info.reset_last_guard_pos();
        assert_eq!(info.last_guard_pos(), None);
    }
}
