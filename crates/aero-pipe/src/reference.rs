//! Shared-ownership helpers for pipe objects.
//!
//! Every pipe object handle is an `Arc<T>`; holding a slot (`Option<Arc<T>>`)
//! counts as one reference. [`retain`] moves a slot from one object to another
//! with the ordering the driver layers rely on: take the new reference first,
//! then drop the old one, and report whether that drop destroyed the object.

use std::sync::Arc;

/// Point `dst` at `src`.
///
/// Returns `true` when the object previously held by `dst` lost its last
/// reference and was destroyed. Assigning an object to a slot that already
/// holds it is a no-op, so there is never a transient over-release.
pub fn retain<T>(dst: &mut Option<Arc<T>>, src: Option<&Arc<T>>) -> bool {
    retain_with(dst, src, drop)
}

/// Like [`retain`], but hands the destroyed object to `destroy` instead of
/// dropping it in place.
pub fn retain_with<T>(
    dst: &mut Option<Arc<T>>,
    src: Option<&Arc<T>>,
    destroy: impl FnOnce(T),
) -> bool {
    match (dst.as_ref(), src) {
        (Some(old), Some(new)) if Arc::ptr_eq(old, new) => return false,
        (None, None) => return false,
        _ => {}
    }

    let new = src.cloned();
    let Some(old) = std::mem::replace(dst, new) else {
        return false;
    };
    match Arc::into_inner(old) {
        Some(last) => {
            destroy(last);
            true
        }
        None => false,
    }
}

/// Release the reference held by `slot`. Returns whether it was the last one.
pub fn release<T>(slot: &mut Option<Arc<T>>) -> bool {
    retain(slot, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screen::Screen;

    #[test]
    fn retain_same_object_is_noop() {
        let screen = Screen::new();
        let res = screen.buffer_create(4);
        let mut slot = Some(res.clone());
        assert!(!retain(&mut slot, Some(&res)));
        assert_eq!(Arc::strong_count(&res), 2);
    }

    #[test]
    fn retain_reports_destruction_of_last_reference() {
        let screen = Screen::new();
        let a = screen.buffer_create(4);
        let b = screen.buffer_create(4);
        let mut slot = Some(a);
        assert!(retain(&mut slot, Some(&b)));
        assert_eq!(screen.counters().snapshot().live_resources(), 1);
        assert_eq!(Arc::strong_count(&b), 2);
    }

    #[test]
    fn retain_keeps_shared_old_value_alive() {
        let screen = Screen::new();
        let a = screen.buffer_create(4);
        let mut slot = Some(a.clone());
        assert!(!release(&mut slot));
        assert!(slot.is_none());
        assert_eq!(Arc::strong_count(&a), 1);
        assert_eq!(screen.counters().snapshot().live_resources(), 1);
    }

    #[test]
    fn retain_handles_null_on_either_side() {
        let screen = Screen::new();
        let a = screen.buffer_create(4);
        let mut slot = None;
        assert!(!retain(&mut slot, None));
        assert!(!retain(&mut slot, Some(&a)));
        assert!(slot.is_some());

        let mut destroyed = Vec::new();
        drop(a);
        assert!(retain_with(&mut slot, None, |res| destroyed.push(res.id())));
        assert_eq!(destroyed.len(), 1);
    }
}
