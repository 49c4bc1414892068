use std::collections::HashMap;

use log::trace;

use crate::{
    metadata::streams::{GuidIndex, MAX_HEAP_OFFSET},
    Error::OutOfBounds,
    Result,
};

/// Accumulates the `#GUID` heap.
///
/// GUIDs are stored back to back as 16 raw bytes and addressed by a 1-based index. The all-zero
/// GUID is never stored and maps to index 0.
#[derive(Debug, Clone, Default)]
pub struct GuidHeapBuilder {
    guids: Vec<uguid::Guid>,
    index: HashMap<uguid::Guid, GuidIndex>,
}

/// Index the GUID stored after `count` others receives
fn next_index(count: usize) -> Result<GuidIndex> {
    let next = count + 1;
    if next > MAX_HEAP_OFFSET {
        return Err(crate::Error::HeapOverflow {
            heap: "#GUID",
            size: next * 16,
        });
    }

    u32::try_from(next)
        .map(GuidIndex)
        .map_err(|_| crate::Error::HeapOverflow {
            heap: "#GUID",
            size: next * 16,
        })
}

impl GuidHeapBuilder {
    /// An empty heap
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `guid`, returning its 1-based index
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if no more indices are available.
    pub fn intern(&mut self, guid: uguid::Guid) -> Result<GuidIndex> {
        if guid.is_zero() {
            return Ok(GuidIndex(0));
        }

        if let Some(existing) = self.index.get(&guid) {
            return Ok(*existing);
        }

        let handle = next_index(self.guids.len())?;
        self.guids.push(guid);
        self.index.insert(guid, handle);
        trace!("#GUID: interned {} at index {}", guid, handle.value());

        Ok(handle)
    }

    /// Number of stored GUIDs
    #[must_use]
    pub fn count(&self) -> usize {
        self.guids.len()
    }

    /// Heap size in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.guids.len() * 16
    }

    /// Whether no GUID has been stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.guids.is_empty()
    }

    /// The serialized heap
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.len());
        for guid in &self.guids {
            data.extend_from_slice(&guid.to_bytes());
        }
        data
    }
}

/// Reader for a `#GUID` heap of a loaded image
pub struct Guid<'a> {
    data: &'a [u8],
}

impl<'a> Guid<'a> {
    /// Wrap heap data
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap isn't a whole number of GUIDs.
    pub fn from(data: &'a [u8]) -> Result<Guid<'a>> {
        if data.len() % 16 != 0 {
            return Err(malformed_error!(
                "#GUID heap size {} is not a multiple of 16",
                data.len()
            ));
        }

        Ok(Guid { data })
    }

    /// The GUID at the 1-based `index`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] for index 0 or an index past the end.
    pub fn get(&self, index: usize) -> Result<uguid::Guid> {
        if index < 1 || index * 16 > self.data.len() {
            return Err(OutOfBounds);
        }

        let offset_start = (index - 1) * 16;

        let mut buffer = [0u8; 16];
        buffer.copy_from_slice(&self.data[offset_start..offset_start + 16]);

        Ok(uguid::Guid::from_bytes(buffer))
    }

    /// Number of GUIDs in the heap
    #[must_use]
    pub fn count(&self) -> usize {
        self.data.len() / 16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_is_one_based() {
        let mut heap = GuidHeapBuilder::new();

        let first = heap
            .intern(uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5"))
            .unwrap();
        let second = heap
            .intern(uguid::guid!("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA"))
            .unwrap();
        let again = heap
            .intern(uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5"))
            .unwrap();

        assert_eq!(first, GuidIndex(1));
        assert_eq!(second, GuidIndex(2));
        assert_eq!(again, first);
        assert_eq!(heap.count(), 2);
        assert_eq!(heap.len(), 32);

        let bytes = heap.to_bytes();
        assert_eq!(&bytes[..4], &[0x8e, 0x90, 0x37, 0xd4]);
    }

    #[test]
    fn zero_guid() {
        let mut heap = GuidHeapBuilder::new();
        assert_eq!(heap.intern(uguid::Guid::ZERO).unwrap(), GuidIndex(0));
        assert!(heap.is_empty());
    }

    #[test]
    fn index_ceiling() {
        assert_eq!(next_index(0).unwrap(), GuidIndex(1));
        assert_eq!(
            next_index(MAX_HEAP_OFFSET - 1).unwrap(),
            GuidIndex(MAX_HEAP_OFFSET as u32)
        );
        assert!(matches!(
            next_index(MAX_HEAP_OFFSET),
            Err(crate::Error::HeapOverflow { heap: "#GUID", .. })
        ));
    }

    #[test]
    fn crafted() {
        #[rustfmt::skip]
        let data : [u8; 48] = [
            /* 1 - 0;16   */  0x8e, 0x90, 0x37, 0xd4, 0xe6, 0x65, 0x7c, 0x48, 0x97, 0x35, 0x7b, 0xdf, 0xf6, 0x99, 0xbe, 0xa5,
            /* 2 - 16;32  */  0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
            /* 3 - 32;48  */  0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        ];

        let guids = Guid::from(&data).unwrap();

        assert_eq!(guids.count(), 3);
        assert_eq!(
            guids.get(1).unwrap(),
            uguid::guid!("d437908e-65e6-487c-9735-7bdff699bea5")
        );
        assert_eq!(
            guids.get(2).unwrap(),
            uguid::guid!("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA")
        );
        assert_eq!(
            guids.get(3).unwrap(),
            uguid::guid!("00000000-0000-0000-0000-000000000000")
        );
        assert!(guids.get(0).is_err());
        assert!(guids.get(4).is_err());
    }

    #[test]
    fn invalid_size() {
        assert!(Guid::from(&[0u8; 15]).is_err());
        assert!(Guid::from(&[]).is_ok());
    }
}
