//! CONTEXT: Pins the wire layout shared by clients and services
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 3 integration tests
//!
//! TEST_SCOPE:
//!   - Status codes seen by peers built separately
//!   - Framebuffer method numbering and argument packing
//!   - Shared area flag bits
use nexus_abi::fb::*;
use nexus_abi::{AreaFlags, Errno, FIRST_USER_METHOD};

#[test]
fn status_codes_are_fixed() {
    assert_eq!(Errno::NotFound.code(), -1);
    assert_eq!(Errno::ResourceLimit.code(), -3);
    assert_eq!(Errno::InvalidArgument.code(), -9);
    assert_eq!(Errno::ServiceUnavailable.code(), -12);
    let codes: Vec<isize> = Errno::ALL.iter().map(|errno| errno.code()).collect();
    assert_eq!(codes, (1..=12).map(|n: isize| -n).collect::<Vec<_>>());
}

#[test]
fn framebuffer_methods_are_dense() {
    assert_eq!(FB_PUTCHAR, FIRST_USER_METHOD);
    assert_eq!(FB_SHM2PIXMAP, FIRST_USER_METHOD + 14);
    assert_eq!(FB_VP2PIXMAP, FIRST_USER_METHOD + 18);
    assert_eq!(FB_ANIM_STOP, FIRST_USER_METHOD + 25);
    assert_eq!(pack_pair(0x12, 0x34), 0x0012_0034);
    assert_eq!(unpack_pair(CURRENT_VIEWPORT), (u16::MAX, u16::MAX));
}

#[test]
fn area_flag_bits() {
    assert_eq!(AreaFlags::READ.bits(), 1);
    assert_eq!(AreaFlags::WRITE.bits(), 2);
    assert_eq!((AreaFlags::READ | AreaFlags::WRITE).bits(), 3);
}
