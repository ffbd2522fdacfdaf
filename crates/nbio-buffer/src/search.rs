//! Byte-pattern search
//!
//! Sunday's variant of Boyer-Moore-Horspool: on a mismatch, the byte just
//! past the current window decides the shift. Short patterns (line feeds,
//! CRLF, frame markers) dominate here, so the shift table is built on the
//! stack per call.

/// Lowest index where `needle` starts in `haystack`
///
/// An empty needle matches at 0. A needle longer than the haystack is
/// never found.
pub fn index_of(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let n = haystack.len();
    let m = needle.len();
    if m == 0 {
        return Some(0);
    }
    if m > n {
        return None;
    }
    if m == 1 {
        return haystack.iter().position(|&b| b == needle[0]);
    }

    // shift[b] = distance from the last occurrence of b in the needle to
    // one past the needle's end
    let mut shift = [m + 1; 256];
    for (i, &b) in needle.iter().enumerate() {
        shift[b as usize] = m - i;
    }

    let mut pos = 0;
    while pos + m <= n {
        if &haystack[pos..pos + m] == needle {
            return Some(pos);
        }
        match haystack.get(pos + m) {
            Some(&next) => pos += shift[next as usize],
            None => break,
        }
    }
    None
}

// ============================================================================
// Tests
// ============================================================================
