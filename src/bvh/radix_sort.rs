use rayon::prelude::*;

use super::PrimIdx;

const DIGIT_BITS: u32 = 8;
const DIGIT_COUNT: usize = 1 << DIGIT_BITS;
const PASSES: u32 = u32::BITS / DIGIT_BITS;
/// Keys per histogram work item
const CHUNK_SIZE: usize = 4096;

/// Morton code of a primitive's centroid.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct MortonKey {
    pub code: u32,
    pub prim: PrimIdx,
}

impl MortonKey {
    fn digit(&self, pass: u32) -> usize {
        ((self.code >> (pass * DIGIT_BITS)) as usize) & (DIGIT_COUNT - 1)
    }
}

/// Stable least significant digit radix sort by code.
///
/// Each pass builds per-chunk digit histograms in parallel. The destination is then cut
/// into disjoint runs in digit major, chunk minor order, one run per (digit, chunk) pair,
/// and every chunk scatters into its own runs in parallel. Keys keep their input order
/// inside a run, so equal codes keep their original order.
pub(crate) fn radix_sort(keys: Vec<MortonKey>) -> Vec<MortonKey> {
    let mut src = keys;
    // Overwritten completely by the first pass that moves anything
    let mut dst = src.clone();

    for pass in 0..PASSES {
        let histograms: Vec<[u32; DIGIT_COUNT]> = src
            .par_chunks(CHUNK_SIZE)
            .map(|chunk| {
                let mut histogram = [0u32; DIGIT_COUNT];
                for key in chunk {
                    histogram[key.digit(pass)] += 1;
                }
                histogram
            })
            .collect();

        // Every key has the same digit, this pass wouldn't move anything
        if histograms
            .iter()
            .fold([0usize; DIGIT_COUNT], |mut acc, h| {
                acc.iter_mut().zip(h).for_each(|(a, x)| *a += *x as usize);
                acc
            })
            .contains(&src.len())
        {
            continue;
        }

        let mut runs: Vec<Vec<&mut [MortonKey]>> = (0..histograms.len())
            .map(|_| Vec::with_capacity(DIGIT_COUNT))
            .collect();
        let mut rest: &mut [MortonKey] = &mut dst;
        for digit in 0..DIGIT_COUNT {
            for (chunk_runs, histogram) in runs.iter_mut().zip(&histograms) {
                let (run, tail) =
                    std::mem::take(&mut rest).split_at_mut(histogram[digit] as usize);
                chunk_runs.push(run);
                rest = tail;
            }
        }

        src.par_chunks(CHUNK_SIZE)
            .zip(runs)
            .for_each(|(chunk, mut chunk_runs)| {
                let mut cursors = [0usize; DIGIT_COUNT];
                for key in chunk {
                    let digit = key.digit(pass);
                    chunk_runs[digit][cursors[digit]] = *key;
                    cursors[digit] += 1;
                }
            });

        std::mem::swap(&mut src, &mut dst);
    }

    src
}

#[cfg(test)]
mod test {
    use super::*;
    use assert2::assert;
    use proptest::prelude::*;
    use test_strategy::proptest;

    fn keys(codes: impl IntoIterator<Item = u32>) -> Vec<MortonKey> {
        codes
            .into_iter()
            .enumerate()
            .map(|(i, code)| MortonKey {
                code,
                prim: PrimIdx::new(i),
            })
            .collect()
    }

    #[test]
    fn sorts_across_all_digits() {
        let sorted = radix_sort(keys([0x3000_0001, 5, 0x0001_0000, 0, 0x3fff_ffff, 0x100]));
        let codes: Vec<u32> = sorted.iter().map(|k| k.code).collect();
        assert!(codes == [0, 5, 0x100, 0x0001_0000, 0x3000_0001, 0x3fff_ffff]);
    }

    #[test]
    fn equal_codes_keep_input_order() {
        // Spans several chunks so the scatter crosses chunk boundaries
        let codes: Vec<u32> = (0..3 * CHUNK_SIZE as u32).map(|i| (i * 7919) % 5).collect();
        let sorted = radix_sort(keys(codes));
        for window in sorted.windows(2) {
            let (a, b) = (window[0], window[1]);
            assert!(a.code <= b.code);
            if a.code == b.code {
                assert!(a.prim < b.prim);
            }
        }
    }

    #[test]
    fn empty_input() {
        assert!(radix_sort(Vec::new()).is_empty());
    }

    #[test]
    fn uneven_digits_across_chunks() {
        // Last chunk is partial and every chunk has a different digit mix
        let count = 5 * CHUNK_SIZE + 123;
        let codes: Vec<u32> = (0..count as u32)
            .map(|i| if i % 3 == 0 { 0xff00_0000 } else { (i / 97) << 8 | (i % 251) })
            .collect();
        let mut expected = keys(codes.iter().copied());
        expected.sort_by_key(|k| k.code);
        assert!(radix_sort(keys(codes)) == expected);
    }

    #[proptest]
    fn matches_stable_sort(
        #[strategy(prop::collection::vec(0u32..(1 << 30), 0..2000))] codes: Vec<u32>,
    ) {
        let mut expected = keys(codes.iter().copied());
        expected.sort_by_key(|k| k.code);
        prop_assert_eq!(radix_sort(keys(codes)), expected);
    }
}
