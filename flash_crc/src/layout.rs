// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Which bytes of the program image are folded into the CRC, and in what
//! order.
//!
//! The device walks live program memory in up to four address ranges
//! ([`Boundaries::plan`]); the host walks three extracted files
//! ([`FilePlan`]).  Both exclude the checksum slot through the same
//! [`SkipWindow`], and both place the read-only data according to the same
//! [`RodataOrder`], so they visit the identical byte sequence.

use crate::{LayoutError, CHECKSUM_SIZE};
use core::fmt;

/// A program-memory address.
///
/// Implemented for `u16` (anything reachable with `lpm`) and `u32`
/// (extended addressing, and all host-side symbol values).
pub trait Address: Copy + Ord + fmt::Debug + fmt::LowerHex {
    fn checked_add(self, n: u32) -> Option<Self>;
    fn prev(self) -> Option<Self>;
    fn wrapping_next(self) -> Self;
    fn widen(self) -> u32;
}

macro_rules! impl_address {
    ($($t:ty),*) => {
        $(
            impl Address for $t {
                #[inline]
                fn checked_add(self, n: u32) -> Option<Self> {
                    <$t>::try_from(n).ok().and_then(|n| <$t>::checked_add(self, n))
                }

                #[inline]
                fn prev(self) -> Option<Self> {
                    <$t>::checked_sub(self, 1)
                }

                #[inline]
                fn wrapping_next(self) -> Self {
                    <$t>::wrapping_add(self, 1)
                }

                #[inline]
                fn widen(self) -> u32 {
                    u32::from(self)
                }
            }
        )*
    };
}

impl_address!(u16, u32);

/// Bytes excluded from the fold: `start..start + len`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SkipWindow<A> {
    pub start: A,
    pub len: u32,
}

impl<A: Address> SkipWindow<A> {
    /// The window covering a checksum slot at `start`.
    pub const fn checksum_slot(start: A) -> Self {
        Self {
            start,
            len: CHECKSUM_SIZE as u32,
        }
    }

    /// First position after the window, if representable.
    pub fn end(&self) -> Option<A> {
        self.start.checked_add(self.len)
    }

    pub fn contains(&self, pos: A) -> bool {
        pos >= self.start && self.end().map_or(true, |end| pos < end)
    }
}

/// Where a region's bytes come from in the build output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source {
    /// Code and progmem data before the checksum slot, or between the slot
    /// and the data load image.
    Text,
    /// The initialized-data load image on its own.
    Data,
    /// The text that follows the slot together with the data load image
    /// right behind it, folded as one range.
    TextAndData,
    /// A discrete read-only-data load region.
    Rodata,
}

/// An inclusive address range `first..=last`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region<A> {
    pub source: Source,
    pub first: A,
    pub last: A,
}

impl<A: Address> Region<A> {
    /// Builds the region for the half-open range `start..end`, or `None`
    /// when it is empty.
    pub fn from_bounds(source: Source, start: A, end: A) -> Option<Self> {
        if start == end {
            return None;
        }
        Some(Region {
            source,
            first: start,
            last: end.prev()?,
        })
    }

    pub fn len(&self) -> u64 {
        u64::from(self.last.widen()) - u64::from(self.first.widen()) + 1
    }

    pub fn contains(&self, addr: A) -> bool {
        addr >= self.first && addr <= self.last
    }

    /// Calls `f` on every address from `first` to `last`, both included.
    ///
    /// The end test comes after the visit and before the increment, so a
    /// region ending at `A::MAX` neither wraps nor loses its last byte.
    pub fn for_each_addr(&self, mut f: impl FnMut(A)) {
        let mut addr = self.first;
        loop {
            f(addr);
            if addr == self.last {
                break;
            }
            addr = addr.wrapping_next();
        }
    }
}

/// Relative order of a discrete rodata region and the data load image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RodataOrder {
    BeforeData,
    AfterData,
}

impl RodataOrder {
    /// Derives the order from the link-time placement of the two regions.
    ///
    /// Equal addresses don't describe a valid layout and are rejected.
    pub fn from_addresses<A: Address>(rodata_start: A, data_start: A) -> Result<Self, LayoutError> {
        match rodata_start.cmp(&data_start) {
            core::cmp::Ordering::Less => Ok(RodataOrder::BeforeData),
            core::cmp::Ordering::Greater => Ok(RodataOrder::AfterData),
            core::cmp::Ordering::Equal => Err(LayoutError::AmbiguousRodataOrder {
                address: rodata_start.widen(),
            }),
        }
    }
}

/// A discrete read-only-data load region, `start..end`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RodataRegion<A> {
    pub start: A,
    pub end: A,
    pub order: RodataOrder,
}

/// The linker's boundary symbols for one image.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Boundaries<A> {
    /// `__vectors`
    pub vectors: A,
    /// Address of the checksum slot
    pub checksum: A,
    /// `__data_load_start`
    pub data_load_start: A,
    /// `__data_load_end`
    pub data_load_end: A,
    /// `__rodata_load_start` / `__rodata_load_end`, on devices with a
    /// rodata MEMORY region
    pub rodata: Option<RodataRegion<A>>,
}

impl<A: Address> Boundaries<A> {
    pub fn slot(&self) -> SkipWindow<A> {
        SkipWindow::checksum_slot(self.checksum)
    }

    /// Computes the ordered list of regions to fold.
    ///
    /// Without a rodata region ordered before the data, this is
    /// `[vectors, checksum - 1]` followed by
    /// `[checksum + CHECKSUM_SIZE, data_load_end - 1]`, then any rodata.
    /// A rodata region ordered before the data splits the second range at
    /// `data_load_start` so that it can sit between the two halves.
    pub fn plan(&self) -> Result<Plan<A>, LayoutError> {
        let slot = self.slot();
        let after_slot = slot.end().ok_or(LayoutError::SlotOverflow {
            checksum: self.checksum.widen(),
        })?;

        if self.checksum < self.vectors {
            return Err(LayoutError::SlotBeforeVectors {
                checksum: self.checksum.widen(),
                vectors: self.vectors.widen(),
            });
        }
        if after_slot > self.data_load_start {
            return Err(LayoutError::SlotPastText {
                checksum: self.checksum.widen(),
                data_load_start: self.data_load_start.widen(),
            });
        }
        if self.data_load_start > self.data_load_end {
            return Err(LayoutError::DataReversed {
                start: self.data_load_start.widen(),
                end: self.data_load_end.widen(),
            });
        }

        let rodata = match self.rodata {
            Some(r) if r.start > r.end => {
                return Err(LayoutError::RodataReversed {
                    start: r.start.widen(),
                    end: r.end.widen(),
                })
            }
            Some(r) if r.start == r.end => None,
            Some(r) => {
                if r.end > self.vectors && r.start < self.data_load_end {
                    return Err(LayoutError::RodataOverlap {
                        start: r.start.widen(),
                        end: r.end.widen(),
                    });
                }
                Some(r)
            }
            None => None,
        };

        let mut plan = Plan::new();
        plan.push(Region::from_bounds(Source::Text, self.vectors, slot.start));

        match rodata {
            Some(r) if r.order == RodataOrder::BeforeData => {
                plan.push(Region::from_bounds(Source::Text, after_slot, self.data_load_start));
                plan.push(Region::from_bounds(Source::Rodata, r.start, r.end));
                plan.push(Region::from_bounds(
                    Source::Data,
                    self.data_load_start,
                    self.data_load_end,
                ));
            }
            _ => {
                plan.push(Region::from_bounds(
                    Source::TextAndData,
                    after_slot,
                    self.data_load_end,
                ));
                if let Some(r) = rodata {
                    plan.push(Region::from_bounds(Source::Rodata, r.start, r.end));
                }
            }
        }

        Ok(plan)
    }
}

const MAX_REGIONS: usize = 4;

/// An ordered, fixed-capacity list of non-empty regions.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Plan<A> {
    regions: [Option<Region<A>>; MAX_REGIONS],
    len: usize,
}

impl<A: Address> Plan<A> {
    fn new() -> Self {
        Plan {
            regions: [None; MAX_REGIONS],
            len: 0,
        }
    }

    fn push(&mut self, region: Option<Region<A>>) {
        if let Some(r) = region {
            self.regions[self.len] = Some(r);
            self.len += 1;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Region<A>> + '_ {
        self.regions[..self.len].iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bytes the plan folds.
    pub fn total_len(&self) -> u64 {
        self.iter().map(Region::len).sum()
    }

    /// Whether any region covers `addr`.
    pub fn covers(&self, addr: A) -> bool {
        self.iter().any(|r| r.contains(addr))
    }
}

/// One of the three extracted binary images.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ImageKind {
    Text,
    Data,
    Rodata,
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageKind::Text => "text",
            ImageKind::Data => "data",
            ImageKind::Rodata => "rodata",
        })
    }
}

/// Fold one whole file, less the bytes in `skip`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileStep {
    pub image: ImageKind,
    pub skip: Option<SkipWindow<u32>>,
}

/// The host-side equivalent of [`Plan`]: the order in which the three
/// extracted images are folded.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FilePlan {
    steps: [FileStep; 3],
}

impl FilePlan {
    /// `text_base` is the address the text image is linked at, `checksum`
    /// the absolute address of the slot.  `rodata` is `None` when the
    /// device has no discrete rodata region.
    pub fn new(
        text_base: u32,
        checksum: u32,
        rodata: Option<RodataOrder>,
    ) -> Result<Self, LayoutError> {
        // Symbols are absolute; the text image starts at offset 0.
        let offset = checksum
            .checked_sub(text_base)
            .ok_or(LayoutError::SlotBeforeVectors {
                checksum,
                vectors: text_base,
            })?;

        let text = FileStep {
            image: ImageKind::Text,
            skip: Some(SkipWindow::checksum_slot(offset)),
        };
        let whole = |image| FileStep { image, skip: None };

        let steps = match rodata {
            None | Some(RodataOrder::BeforeData) => {
                [text, whole(ImageKind::Rodata), whole(ImageKind::Data)]
            }
            Some(RodataOrder::AfterData) => {
                [text, whole(ImageKind::Data), whole(ImageKind::Rodata)]
            }
        };
        Ok(FilePlan { steps })
    }

    pub fn steps(&self) -> &[FileStep] {
        &self.steps
    }

    /// The skip window applied to the text image.
    pub fn slot(&self) -> Option<SkipWindow<u32>> {
        self.steps.iter().find_map(|s| s.skip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::vec::Vec;

    fn simple(vectors: u16, checksum: u16, data_start: u16, data_end: u16) -> Boundaries<u16> {
        Boundaries {
            vectors,
            checksum,
            data_load_start: data_start,
            data_load_end: data_end,
            rodata: None,
        }
    }

    fn regions<A: Address>(plan: &Plan<A>) -> Vec<Region<A>> {
        plan.iter().copied().collect()
    }

    #[test]
    fn two_regions_around_slot() {
        let plan = simple(0, 4, 10, 14).plan().unwrap();
        assert_eq!(
            regions(&plan),
            [
                Region { source: Source::Text, first: 0, last: 3 },
                Region { source: Source::TextAndData, first: 6, last: 13 },
            ]
        );
        assert_eq!(plan.total_len(), 12);
        assert!(!plan.covers(4));
        assert!(!plan.covers(5));
    }

    #[test]
    fn text_after_slot_is_not_labelled_data() {
        let plan = simple(0, 4, 10, 14).plan().unwrap();
        assert!(plan.iter().all(|r| r.source != Source::Data));
        assert_eq!(
            plan.iter().map(|r| r.source).collect::<Vec<_>>(),
            [Source::Text, Source::TextAndData]
        );
    }

    #[test]
    fn slot_at_end_of_image() {
        // Nothing after the slot: the second region is skipped, not folded
        // as a single byte.
        let plan = simple(0, 8, 10, 10).plan().unwrap();
        assert_eq!(
            regions(&plan),
            [Region { source: Source::Text, first: 0, last: 7 }]
        );
    }

    #[test]
    fn slot_at_vectors() {
        let plan = simple(0x100, 0x100, 0x108, 0x108).plan().unwrap();
        assert_eq!(
            regions(&plan),
            [Region { source: Source::TextAndData, first: 0x102, last: 0x107 }]
        );
    }

    #[test]
    fn rodata_after_data() {
        let mut b = simple(0, 4, 10, 14);
        b.rodata = Some(RodataRegion {
            start: 0x8000,
            end: 0x8010,
            order: RodataOrder::AfterData,
        });
        let plan = b.plan().unwrap();
        assert_eq!(
            regions(&plan),
            [
                Region { source: Source::Text, first: 0, last: 3 },
                Region { source: Source::TextAndData, first: 6, last: 13 },
                Region { source: Source::Rodata, first: 0x8000, last: 0x800f },
            ]
        );
    }

    #[test]
    fn rodata_before_data_splits_tail() {
        let b = Boundaries::<u32> {
            vectors: 0x1000,
            checksum: 0x1004,
            data_load_start: 0x1010,
            data_load_end: 0x1014,
            rodata: Some(RodataRegion {
                start: 0x800,
                end: 0x808,
                order: RodataOrder::BeforeData,
            }),
        };
        let plan = b.plan().unwrap();
        assert_eq!(
            regions(&plan),
            [
                Region { source: Source::Text, first: 0x1000, last: 0x1003 },
                Region { source: Source::Text, first: 0x1006, last: 0x100f },
                Region { source: Source::Rodata, first: 0x800, last: 0x807 },
                Region { source: Source::Data, first: 0x1010, last: 0x1013 },
            ]
        );
    }

    #[test]
    fn empty_rodata_is_skipped() {
        let mut b = simple(0, 4, 10, 14);
        b.rodata = Some(RodataRegion {
            start: 0x8000,
            end: 0x8000,
            order: RodataOrder::AfterData,
        });
        assert_eq!(b.plan().unwrap().len(), 2);
    }

    #[test]
    fn rejects_bad_layouts() {
        assert!(matches!(
            simple(8, 4, 10, 14).plan(),
            Err(LayoutError::SlotBeforeVectors { .. })
        ));
        assert!(matches!(
            simple(0, 9, 10, 14).plan(),
            Err(LayoutError::SlotPastText { .. })
        ));
        assert!(matches!(
            simple(0, 0xfffe, 0xffff, 0xffff).plan(),
            Err(LayoutError::SlotOverflow { .. })
        ));
        assert!(matches!(
            simple(0, 4, 14, 10).plan(),
            Err(LayoutError::DataReversed { .. })
        ));

        let mut b = simple(0, 4, 10, 14);
        b.rodata = Some(RodataRegion {
            start: 12,
            end: 20,
            order: RodataOrder::AfterData,
        });
        assert!(matches!(b.plan(), Err(LayoutError::RodataOverlap { .. })));

        b.rodata = Some(RodataRegion {
            start: 30,
            end: 20,
            order: RodataOrder::AfterData,
        });
        assert!(matches!(b.plan(), Err(LayoutError::RodataReversed { .. })));
    }

    #[test]
    fn region_at_top_of_address_space() {
        let r = Region::from_bounds(Source::Rodata, 0xfffcu16, 0xffff).unwrap();
        let mut seen = Vec::new();
        r.for_each_addr(|a| seen.push(a));
        assert_eq!(seen, [0xfffc, 0xfffd, 0xfffe]);

        let r = Region {
            source: Source::Rodata,
            first: 0xfffeu16,
            last: 0xffff,
        };
        let mut seen = Vec::new();
        r.for_each_addr(|a| seen.push(a));
        assert_eq!(seen, [0xfffe, 0xffff]);
        assert_eq!(r.len(), 2);
    }

    #[test]
    fn rodata_order_from_addresses() {
        assert_eq!(
            RodataOrder::from_addresses(0x100u32, 0x200).unwrap(),
            RodataOrder::BeforeData
        );
        assert_eq!(
            RodataOrder::from_addresses(0x300u32, 0x200).unwrap(),
            RodataOrder::AfterData
        );
        assert_eq!(
            RodataOrder::from_addresses(0x200u32, 0x200),
            Err(LayoutError::AmbiguousRodataOrder { address: 0x200 })
        );
    }

    #[test]
    fn skip_window() {
        let w = SkipWindow::checksum_slot(4u32);
        assert_eq!(w.end(), Some(6));
        assert!(!w.contains(3));
        assert!(w.contains(4));
        assert!(w.contains(5));
        assert!(!w.contains(6));
    }

    #[test]
    fn file_plan_order() {
        let slot = Some(SkipWindow::checksum_slot(0x24));
        let text = FileStep { image: ImageKind::Text, skip: slot };
        let whole = |image| FileStep { image, skip: None };

        let p = FilePlan::new(0x100, 0x124, None).unwrap();
        assert_eq!(
            p.steps(),
            [text, whole(ImageKind::Rodata), whole(ImageKind::Data)]
        );

        let p = FilePlan::new(0x100, 0x124, Some(RodataOrder::AfterData)).unwrap();
        assert_eq!(
            p.steps(),
            [text, whole(ImageKind::Data), whole(ImageKind::Rodata)]
        );

        let p = FilePlan::new(0x100, 0x124, Some(RodataOrder::BeforeData)).unwrap();
        assert_eq!(
            p.steps(),
            [text, whole(ImageKind::Rodata), whole(ImageKind::Data)]
        );
        assert_eq!(p.slot(), slot);

        assert!(FilePlan::new(0x100, 0x80, None).is_err());
    }

    fn arb_boundaries() -> impl Strategy<Value = Boundaries<u32>> {
        (
            0u32..0x1000,
            0u32..0x1000,
            0u32..0x1000,
            0u32..0x1000,
            proptest::option::of((0u32..0x100, any::<bool>())),
        )
            .prop_map(|(vectors, before_slot, tail, data, rodata)| {
                let checksum = vectors + before_slot;
                let data_load_start = checksum + CHECKSUM_SIZE as u32 + tail;
                let data_load_end = data_load_start + data;
                let rodata = rodata.map(|(len, before)| {
                    let start = data_load_end + 0x10;
                    RodataRegion {
                        start,
                        end: start + len,
                        order: if before {
                            RodataOrder::BeforeData
                        } else {
                            RodataOrder::AfterData
                        },
                    }
                });
                Boundaries {
                    vectors,
                    checksum,
                    data_load_start,
                    data_load_end,
                    rodata,
                }
            })
    }

    proptest! {
        #[test]
        fn plan_covers_everything_but_the_slot(b in arb_boundaries()) {
            let plan = b.plan().unwrap();
            let rs = regions(&plan);

            for (i, r) in rs.iter().enumerate() {
                prop_assert!(r.first <= r.last);
                for other in &rs[i + 1..] {
                    prop_assert!(r.last < other.first || other.last < r.first);
                }
            }

            let slot = b.slot();
            for addr in b.vectors..b.data_load_end {
                prop_assert_eq!(plan.covers(addr), !slot.contains(addr));
            }
            let rodata_len = match b.rodata {
                Some(r) => {
                    for addr in r.start..r.end {
                        prop_assert!(plan.covers(addr));
                    }
                    u64::from(r.end - r.start)
                }
                None => 0,
            };
            prop_assert_eq!(
                plan.total_len(),
                u64::from(b.data_load_end - b.vectors) - CHECKSUM_SIZE as u64 + rodata_len
            );
        }

        #[test]
        fn plan_order_follows_policy(b in arb_boundaries()) {
            let plan = b.plan().unwrap();
            let sources: Vec<Source> = plan.iter().map(|r| r.source).collect();
            let rodata_at = sources.iter().position(|s| *s == Source::Rodata);
            let data_at = sources
                .iter()
                .position(|s| matches!(s, Source::Data | Source::TextAndData));
            if let (Some(r), Some(d)) = (rodata_at, data_at) {
                match b.rodata.map(|r| r.order) {
                    Some(RodataOrder::BeforeData) => prop_assert!(r < d),
                    _ => prop_assert!(r > d),
                }
            }
            let first = plan.iter().next().copied();
            if let Some(first) = first {
                if b.checksum != b.vectors {
                    prop_assert_eq!(first.first, b.vectors);
                    prop_assert_eq!(first.last, b.checksum - 1);
                }
            }
        }
    }
}
