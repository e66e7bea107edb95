/// One contiguous byte interval of the resource, the unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// 1-based, increasing in offset order.
    pub id:     u64,
    pub offset: u64,
    pub len:    u64,
}

impl Range {
    /// One past the last byte.
    pub fn end(&self) -> u64 { self.offset + self.len }
}

/// Fixed-size partition of `[0, size)` into ranges of `block` bytes.
///
/// Every range is a full block except the last, which carries the remainder.
#[derive(Debug, Clone)]
pub struct RangePlan {
    size:   u64,
    block:  u64,
    ranges: u64,
    next:   u64,
}

impl RangePlan {
    pub fn new(size: u64, block: u64) -> Self {
        let ranges = if block == 0 { 0 } else { size.div_ceil(block) };
        Self {
            size,
            block,
            ranges,
            next: 1,
        }
    }

    pub fn size(&self) -> u64 { self.size }

    pub fn block(&self) -> u64 { self.block }

    /// Number of ranges in the whole plan, regardless of iteration.
    pub fn ranges(&self) -> u64 { self.ranges }

    /// The range with sequence id `id`, if the plan has one.
    pub fn get(&self, id: u64) -> Option<Range> {
        if id == 0 || id > self.ranges {
            return None;
        }
        let offset = (id - 1) * self.block;
        Some(Range {
            id,
            offset,
            len: self.block.min(self.size - offset),
        })
    }
}

impl Iterator for RangePlan {
    type Item = Range;

    fn next(&mut self) -> Option<Range> {
        let range = self.get(self.next)?;
        self.next += 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.ranges + 1).saturating_sub(self.next);
        let left = usize::try_from(left).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

impl ExactSizeIterator for RangePlan {}
