//! Shared binary-layout helpers used by the WV and IQW/IQTAR codecs.

/// One column of a 4-row boolean control matrix: `[marker_1, marker_2, marker_3, marker_4]`.
pub type ControlColumn = [bool; 4];

/// Packs a 4×N boolean control matrix into its on-disk byte representation.
///
/// Every two consecutive columns (8 bits) become one byte, column 0 in the high
/// nibble, column 1 in the low nibble, each nibble big-endian over its four rows. An
/// odd column count is right-padded with a zero column before packing.
pub fn pack_control_list(columns: &[ControlColumn]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(columns.len().div_ceil(2));
    let mut pairs = columns.chunks(2);
    for pair in &mut pairs {
        let first = pair[0];
        let second = pair.get(1).copied().unwrap_or([false; 4]);
        packed.push(pack_byte(first, second));
    }
    packed
}

fn pack_byte(first: ControlColumn, second: ControlColumn) -> u8 {
    let mut byte = 0u8;
    for (i, bit) in first.iter().chain(second.iter()).enumerate() {
        if *bit {
            byte |= 1 << (7 - i);
        }
    }
    byte
}

/// Unpacks a control-list byte stream into `num_samples` boolean columns.
///
/// Inverse of [`pack_control_list`]: each byte yields two columns, and the result is
/// truncated to the requested sample count (dropping the zero-padding column written
/// for an odd sample count).
pub fn unpack_control_list(bytes: &[u8], num_samples: usize) -> Vec<ControlColumn> {
    let mut columns = Vec::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let mut first = [false; 4];
        let mut second = [false; 4];
        for i in 0..4 {
            first[i] = (byte >> (7 - i)) & 1 != 0;
            second[i] = (byte >> (3 - i)) & 1 != 0;
        }
        columns.push(first);
        columns.push(second);
    }
    columns.truncate(num_samples);
    columns
}

/// De-interleaves channel `channel` (0 = I, 1 = Q) out of a buffer of interleaved
/// fixed-width I/Q pairs.
///
/// `elem_size` is the byte width of a single real or imaginary component (4 for the
/// `.iqw`/`.iq.tar` float32 payload, 2 for the `.wv` int16 payload). `offset`/`length`
/// select a window in samples; passing `length == 0` (or a window that does not fit)
/// returns the whole buffer, matching the reference decoder's full-buffer fallback.
pub fn deinterleave_pairs(
    buf: &[u8],
    elem_size: usize,
    channel: usize,
    offset: usize,
    length: usize,
) -> Vec<u8> {
    let pair_size = elem_size * 2;
    let mut actual_length = length * pair_size;
    let mut actual_offset = offset * pair_size;
    if actual_length == 0 || actual_length > buf.len() {
        actual_length = buf.len();
        actual_offset = 0;
    }
    if actual_length + actual_offset > buf.len() {
        actual_offset = buf.len() - actual_length;
    }

    let start = channel * elem_size + actual_offset;
    let end = actual_offset + actual_length;
    let mut out = Vec::with_capacity(end.saturating_sub(start) / pair_size.max(1) * elem_size);
    let mut idx = start;
    while idx < end {
        let upper = (idx + elem_size).min(buf.len());
        out.extend_from_slice(&buf[idx..upper]);
        idx += pair_size;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_the_spec_example() {
        // marker rows: [0,1], [1,0], [1,0], [0,1] -> columns [0,1,1,0], [1,0,0,1]
        let columns = [[false, true, true, false], [true, false, false, true]];
        assert_eq!(pack_control_list(&columns), vec![0x69]);
    }

    #[test]
    fn unpack_reproduces_the_input() {
        let columns = unpack_control_list(&[0x69], 2);
        assert_eq!(
            columns,
            vec![[false, true, true, false], [true, false, false, true]]
        );
    }

    #[test]
    fn pack_unpack_round_trip_pads_odd_columns_with_zero() {
        let columns = vec![[true, false, true, false]; 3];
        let packed = pack_control_list(&columns);
        assert_eq!(packed.len(), 2);
        let unpacked = unpack_control_list(&packed, 3);
        assert_eq!(unpacked, columns);
    }

    #[test]
    fn deinterleave_pairs_splits_iq() {
        // two float32 pairs: I=0x00000001, Q=0x00000002, I=0x00000003, Q=0x00000004
        let buf: Vec<u8> = vec![
            1, 0, 0, 0, 2, 0, 0, 0, //
            3, 0, 0, 0, 4, 0, 0, 0,
        ];
        let i = deinterleave_pairs(&buf, 4, 0, 0, 0);
        let q = deinterleave_pairs(&buf, 4, 1, 0, 0);
        assert_eq!(i, vec![1, 0, 0, 0, 3, 0, 0, 0]);
        assert_eq!(q, vec![2, 0, 0, 0, 4, 0, 0, 0]);
    }

    #[test]
    fn deinterleave_pairs_windows_by_sample_offset() {
        let buf: Vec<u8> = vec![
            1, 0, 0, 0, 2, 0, 0, 0, //
            3, 0, 0, 0, 4, 0, 0, 0,
        ];
        let i = deinterleave_pairs(&buf, 4, 0, 1, 1);
        assert_eq!(i, vec![3, 0, 0, 0]);
    }
}
