use std::collections::HashMap;

use log::trace;

use crate::{
    file::parser::Parser,
    metadata::streams::{check_offset, BlobIndex},
    utils::{compressed_uint_size, write_compressed_uint},
    Error::OutOfBounds,
    Result,
};

/// Accumulates the `#Blob` heap.
///
/// Every entry is a compressed length followed by the bytes. Offset 0 is the empty blob;
/// identical byte runs share one entry, which is what lets the `.ctor` signature of several
/// member references collapse to a single blob.
#[derive(Debug, Clone)]
pub struct BlobHeapBuilder {
    data: Vec<u8>,
    index: HashMap<Vec<u8>, BlobIndex>,
}

impl BlobHeapBuilder {
    /// A heap holding only the empty blob
    #[must_use]
    pub fn new() -> Self {
        BlobHeapBuilder {
            data: vec![0],
            index: HashMap::new(),
        }
    }

    /// Intern `value`, returning its offset
    ///
    /// # Errors
    /// Returns [`crate::Error::HeapOverflow`] if the heap is full.
    pub fn intern(&mut self, value: &[u8]) -> Result<BlobIndex> {
        if value.is_empty() {
            return Ok(BlobIndex(0));
        }

        if let Some(existing) = self.index.get(value) {
            return Ok(*existing);
        }

        let entry_size = compressed_uint_size(value.len()) as usize + value.len();
        let offset = check_offset("#Blob", self.data.len(), self.data.len() + entry_size)?;
        let length = u32::try_from(value.len()).map_err(|_| crate::Error::HeapOverflow {
            heap: "#Blob",
            size: self.data.len() + entry_size,
        })?;

        write_compressed_uint(length, &mut self.data)?;
        self.data.extend_from_slice(value);

        let handle = BlobIndex(offset);
        self.index.insert(value.to_vec(), handle);
        trace!("#Blob: interned {} bytes at 0x{:X}", value.len(), offset);

        Ok(handle)
    }

    /// The bytes stored at `index`, if it was interned here
    #[must_use]
    pub fn get(&self, index: BlobIndex) -> Option<&[u8]> {
        if index.is_null() {
            return Some(&[]);
        }

        Blob { data: &self.data }.get(index.value() as usize).ok()
    }

    /// Current heap size, without padding
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing but the empty blob is present
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.len() == 1
    }

    /// The heap bytes, without padding
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Default for BlobHeapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Reader for a `#Blob` heap of a loaded image
pub struct Blob<'a> {
    data: &'a [u8],
}

impl<'a> Blob<'a> {
    /// Wrap heap data
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the heap doesn't start with the empty blob.
    pub fn from(data: &'a [u8]) -> Result<Blob<'a>> {
        if data.is_empty() || data[0] != 0 {
            return Err(malformed_error!("Invalid memory for #Blob heap"));
        }

        Ok(Blob { data })
    }

    /// The blob at `index`
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the entry runs past the end of the heap.
    pub fn get(&self, index: usize) -> Result<&'a [u8]> {
        if index > self.data.len() {
            return Err(OutOfBounds);
        }

        let mut parser = Parser::new(&self.data[index..]);
        let len = parser.read_compressed_uint()? as usize;
        let skip = parser.pos();

        let Some(data_start) = index.checked_add(skip) else {
            return Err(OutOfBounds);
        };

        let Some(data_end) = data_start.checked_add(len) else {
            return Err(OutOfBounds);
        };

        if data_end > self.data.len() {
            return Err(OutOfBounds);
        }

        Ok(&self.data[data_start..data_end])
    }

    /// Size of the heap in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the heap is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow() {
        let mut heap = BlobHeapBuilder::new();

        let large = heap.intern(&vec![0xAB; 0x0100_0000]).unwrap();
        assert_eq!(large, BlobIndex(1));

        assert!(matches!(
            heap.intern(&[1, 2, 3]),
            Err(crate::Error::HeapOverflow { heap: "#Blob", .. })
        ));
        // Already interned content needs no new offset
        assert_eq!(heap.intern(&vec![0xAB; 0x0100_0000]).unwrap(), large);
    }

    #[test]
    fn intern_dedup() {
        let mut heap = BlobHeapBuilder::new();

        let ctor = heap.intern(&[0x20, 0x00, 0x01]).unwrap();
        let write_line = heap.intern(&[0x00, 0x01, 0x01, 0x0E]).unwrap();
        let ctor_again = heap.intern(&[0x20, 0x00, 0x01]).unwrap();

        assert_eq!(ctor, ctor_again);
        assert_eq!(ctor.value(), 1);
        assert_eq!(write_line.value(), 5);
        assert_eq!(
            heap.as_bytes(),
            &[0x00, 0x03, 0x20, 0x00, 0x01, 0x04, 0x00, 0x01, 0x01, 0x0E]
        );
        assert_eq!(heap.get(write_line), Some(&[0x00, 0x01, 0x01, 0x0E][..]));
    }

    #[test]
    fn empty_blob_is_offset_zero() {
        let mut heap = BlobHeapBuilder::new();
        assert_eq!(heap.intern(&[]).unwrap(), BlobIndex(0));
        assert!(heap.is_empty());
    }

    #[test]
    fn two_byte_length() {
        let mut heap = BlobHeapBuilder::new();
        let payload = vec![0xAB; 200];
        let offset = heap.intern(&payload).unwrap();

        assert_eq!(&heap.as_bytes()[1..3], &[0x80, 0xC8]);
        assert_eq!(heap.len(), 1 + 2 + 200);

        let reader = Blob::from(heap.as_bytes()).unwrap();
        assert_eq!(reader.get(offset.value() as usize).unwrap(), &payload[..]);
    }

    #[test]
    fn crafted() {
        let data = [0x00, 0x02, 0xAA, 0xBB, 0x01, 0xCC];
        let blob = Blob::from(&data).unwrap();

        assert_eq!(blob.get(0).unwrap(), &[] as &[u8]);
        assert_eq!(blob.get(1).unwrap(), &[0xAA, 0xBB]);
        assert_eq!(blob.get(4).unwrap(), &[0xCC]);
    }

    #[test]
    fn invalid() {
        assert!(Blob::from(&[]).is_err());
        assert!(Blob::from(&[0x01]).is_err());

        let data = [0x00, 0x05, 0xAA];
        let blob = Blob::from(&data).unwrap();
        assert!(blob.get(1).is_err());
        assert!(blob.get(10).is_err());
    }
}
