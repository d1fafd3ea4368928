use super::*;

#[test]
fn local_reference_has_no_internal_handle() {
    let r = Reference::local(8, 2);
    assert_eq!(r.size, 8);
    assert_eq!(r.internal(), None);
    assert_eq!(r.target, RefTarget::Local(2));
}

#[test]
fn slot_reference_reports_its_handle() {
    let r = Reference::to_slot(16, 7);
    assert_eq!(r.internal(), Some(7));
}

#[test]
fn cref_mirrors_reference_construction() {
    let cr = CReference::to_slot(4, 3);
    assert_eq!(cr.internal(), Some(3));
    let local = CReference::local(4, 1);
    assert_eq!(local.internal(), None);
}

#[test]
fn reference_downgrades_to_cref_preserving_size_and_target() {
    let r = Reference::to_slot(32, 9);
    let cr: CReference = r.into();
    assert_eq!(cr.size, 32);
    assert_eq!(cr.internal(), Some(9));
}
