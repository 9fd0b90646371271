use rand::Rng;

/// `n` bytes of noise, effectively incompressible
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n];
    rand::rng().fill(&mut bytes[..]);
    bytes
}

/// Repetitive text, compresses well
pub fn text_bytes(n: usize) -> Vec<u8> {
    b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .copied()
        .cycle()
        .take(n)
        .collect()
}

/// Panic with the first differing offset and some surrounding context
pub fn compare_slices(left: &[u8], right: &[u8], msg: Option<&str>) {
    if left == right {
        return;
    }

    let label = msg.map(|m| format!(": {}", m)).unwrap_or_default();
    if left.len() != right.len() {
        panic!(
            "slices differ{}
  left len: {}
 right len: {}",
            label,
            left.len(),
            right.len()
        );
    }

    if let Some(i) = left.iter().zip(right).position(|(a, b)| a != b) {
        let start = i.saturating_sub(16);
        let end = (i + 16).min(left.len());
        panic!(
            "slices differ{} at index {}
  left: {:02X?}
 right: {:02X?}",
            label,
            i,
            &left[start..end],
            &right[start..end]
        );
    }
}

#[macro_export]
macro_rules! assert_slices_eq {
    ($left:expr, $right:expr) => {
        $crate::test_utils::compare_slices(&$left[..], &$right[..], None)
    };
    ($left:expr, $right:expr, $msg:expr) => {
        $crate::test_utils::compare_slices(
            &$left[..],
            &$right[..],
            Some(::std::convert::AsRef::<str>::as_ref(&$msg)),
        )
    };
}
