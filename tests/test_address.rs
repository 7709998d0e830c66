use mmtk_g1::util::Address;

#[test]
fn test_align_up() {
    let addr = Address::ZERO;
    let aligned = addr.align_up(8);

    assert_eq!(addr, aligned);

    let addr = unsafe { Address::from_usize(0x1001) };
    assert_eq!(addr.align_up(0x1000).as_usize(), 0x2000);
    assert_eq!(addr.align_down(0x1000).as_usize(), 0x1000);
}

#[test]
fn test_is_aligned() {
    let addr = Address::ZERO;
    assert!(addr.is_aligned_to(8));

    let addr = unsafe { Address::from_usize(8) };
    assert!(addr.is_aligned_to(8));
    assert!(!addr.is_aligned_to(16));
}

#[test]
fn test_words() {
    let base = unsafe { Address::from_usize(0x10000) };
    let end = base.add_words(10);
    assert_eq!(end - base, 10 * std::mem::size_of::<usize>());
    assert_eq!(end.words_from(base), 10);
}
