//! Fixed-size index tuple records.
//!
//! One tuple record stores one node at one level: the header, the
//! inline vector `x[dims]`, and the inline neighbor array of capacity
//! `2 * M` entries. All tuples of an index share one record size, so
//! in-page offsets are computable without line pointers.
//!
//! # Layout
//!
//! ```text
//! TupleHeader (72 bytes)
//! x[dims]     (dims * 4 bytes, at offset 72)
//! neighbors   (2 * M entries of 12 bytes, at offset_out_links)
//! padding to an 8-byte boundary
//! ```

use bytemuck::{Pod, Zeroable};

/// Sentinel for "no block".
pub const INVALID_BLOCK: u32 = u32::MAX;

/// First valid in-page tuple offset (offsets are 1-based).
pub const FIRST_OFFSET: u16 = 1;

/// Opaque reference to the owning source row.
///
/// The index never interprets this value; it is handed back to the
/// caller by the query scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct HeapPointer(
    /// The opaque row reference.
    pub u64,
);

/// Identifier of one tuple record: `(block number, in-page offset)`
/// packed into a single 64-bit word so it is cheap to compare and hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Pod, Zeroable)]
#[repr(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Sentinel indicating "no node".
    pub const INVALID: Self = NodeId((INVALID_BLOCK as u64) << 32);

    /// Packs a block number and in-page offset.
    #[must_use]
    pub fn new(blkno: u32, offset: u16) -> Self {
        Self((u64::from(blkno) << 32) | u64::from(offset))
    }

    /// The block number half.
    #[must_use]
    pub fn blkno(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The in-page offset half (1-based; 0 is invalid).
    #[must_use]
    pub fn offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// True when both halves denote a real tuple slot.
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.blkno() != INVALID_BLOCK && self.offset() != 0
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.blkno(), self.offset())
    }
}

/// One entry of the inline neighbor array: `(node id, distance)`.
///
/// Packed so the array can sit at any byte offset after the vector.
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
#[repr(C, packed)]
pub struct Neighbor {
    /// The neighbor's tuple record.
    pub id: NodeId,
    /// Distance between the owner and the neighbor.
    pub distance: f32,
}

/// Size of one serialized neighbor entry.
pub const NEIGHBOR_SIZE: usize = 12;

const _: () = assert!(core::mem::size_of::<Neighbor>() == NEIGHBOR_SIZE);

/// Fixed header of a tuple record.
///
/// # Layout
///
/// Total size: 72 bytes, alignment 8, no implicit padding.
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
#[repr(C)]
pub struct TupleHeader {
    /// Opaque reference to the owning source row.
    pub heap_ptr: HeapPointer, // 0
    /// Total serialized record size.
    pub size_tuple: u64, // 8
    /// This node's id on the level below (invalid at level 0).
    pub next: NodeId, // 16
    /// This record's own id (set at placement).
    pub self_id: NodeId, // 24
    /// Level this record lives on.
    pub level: u32, // 32
    /// Degree bound: `M` above level 0, `2 * M` at level 0.
    pub max_m: u32, // 36
    /// Vector dimensionality (always equals the meta record's).
    pub dims: u32, // 40
    /// Number of live neighbor entries.
    pub out_degree: u32, // 44
    /// Advisory count of inbound edges (best-effort).
    pub in_degree: u32, // 48
    /// Byte offset of the neighbor array within the record.
    pub offset_out_links: u32, // 52
    /// Auxiliary scalar used by the custom linear scorer.
    pub id: u32, // 56
    /// Auxiliary scalar used by the custom linear scorer.
    pub bias: f32, // 60
    /// Tombstone flag.
    pub deleted: u8, // 64
    /// Explicit padding, always zero.
    pub _pad: [u8; 7], // 65
}

/// Size of the serialized tuple header.
pub const TUPLE_HEADER_SIZE: usize = 72;

const _: () = assert!(core::mem::size_of::<TupleHeader>() == TUPLE_HEADER_SIZE);
const _: () = assert!(core::mem::align_of::<TupleHeader>() == 8);

/// The uniform record size for an index with the given dimensionality
/// and base fan-out. Every level reserves `2 * M` neighbor slots so all
/// records share one size; `max_m` caps how many may be live.
#[must_use]
pub fn tuple_size(dims: u32, m: u32) -> usize {
    let raw = TUPLE_HEADER_SIZE
        + core::mem::size_of::<f32>() * dims as usize
        + NEIGHBOR_SIZE * 2 * m as usize;
    (raw + 7) & !7
}

/// Byte offset of the neighbor array for the given dimensionality.
#[must_use]
pub fn out_links_offset(dims: u32) -> usize {
    TUPLE_HEADER_SIZE + core::mem::size_of::<f32>() * dims as usize
}

/// Serializes a fresh tuple record with a zero-filled neighbor array.
#[must_use]
pub fn form_tuple(
    heap_ptr: HeapPointer,
    level: u32,
    m: u32,
    vector: &[f32],
    id: u32,
    bias: f32,
) -> Vec<u8> {
    let dims = vector.len() as u32;
    let size = tuple_size(dims, m);
    let header = TupleHeader {
        heap_ptr,
        size_tuple: size as u64,
        next: NodeId::INVALID,
        self_id: NodeId::INVALID,
        level,
        max_m: if level == 0 { 2 * m } else { m },
        dims,
        out_degree: 0,
        in_degree: 0,
        offset_out_links: out_links_offset(dims) as u32,
        id,
        bias,
        deleted: 0,
        _pad: [0; 7],
    };

    let mut bytes = vec![0u8; size];
    bytes[..TUPLE_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
    bytes[TUPLE_HEADER_SIZE..TUPLE_HEADER_SIZE + vector.len() * 4]
        .copy_from_slice(bytemuck::cast_slice(vector));
    bytes
}

/// Read-only view over one tuple record on a pinned page.
///
/// The view borrows the page guard it was created from, so it cannot
/// outlive the pin.
pub struct TupleView<'a> {
    bytes: &'a [u8],
    header: TupleHeader,
}

impl<'a> TupleView<'a> {
    /// Wraps the record bytes at a tuple slot.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        let header = bytemuck::pod_read_unaligned(&bytes[..TUPLE_HEADER_SIZE]);
        Self { bytes, header }
    }

    /// The decoded header.
    #[must_use]
    pub fn header(&self) -> &TupleHeader {
        &self.header
    }

    /// The inline vector.
    #[must_use]
    pub fn vector(&self) -> &'a [f32] {
        let start = TUPLE_HEADER_SIZE;
        let end = start + self.header.dims as usize * 4;
        bytemuck::cast_slice(&self.bytes[start..end])
    }

    /// The live neighbor entries (`[0..out_degree)`).
    #[must_use]
    pub fn neighbors(&self) -> &'a [Neighbor] {
        let start = self.header.offset_out_links as usize;
        let end = start + self.header.out_degree as usize * NEIGHBOR_SIZE;
        bytemuck::cast_slice(&self.bytes[start..end])
    }

    /// Copies the full record out of the page.
    #[must_use]
    pub fn to_owned_bytes(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

/// Mutable access to one tuple record under an exclusive page latch.
pub struct TupleMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> TupleMut<'a> {
    /// Wraps the record bytes at a tuple slot.
    #[must_use]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Decodes the current header.
    #[must_use]
    pub fn header(&self) -> TupleHeader {
        bytemuck::pod_read_unaligned(&self.bytes[..TUPLE_HEADER_SIZE])
    }

    /// Overwrites the header.
    pub fn set_header(&mut self, header: &TupleHeader) {
        self.bytes[..TUPLE_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(header));
    }

    /// Overwrites the live neighbor prefix and the out-degree.
    ///
    /// # Panics
    ///
    /// Panics if `neighbors.len()` exceeds the allocated capacity.
    pub fn set_neighbors(&mut self, neighbors: &[Neighbor]) {
        let mut header = self.header();
        let capacity = (header.size_tuple as usize - header.offset_out_links as usize)
            / NEIGHBOR_SIZE;
        assert!(neighbors.len() <= capacity, "neighbor overflow");
        let start = header.offset_out_links as usize;
        let end = start + neighbors.len() * NEIGHBOR_SIZE;
        self.bytes[start..end].copy_from_slice(bytemuck::cast_slice(neighbors));
        header.out_degree = neighbors.len() as u32;
        self.set_header(&header);
    }

    /// Appends one neighbor entry and bumps the out-degree.
    pub fn push_neighbor(&mut self, neighbor: Neighbor) {
        let mut header = self.header();
        let start =
            header.offset_out_links as usize + header.out_degree as usize * NEIGHBOR_SIZE;
        self.bytes[start..start + NEIGHBOR_SIZE]
            .copy_from_slice(bytemuck::bytes_of(&neighbor));
        header.out_degree += 1;
        self.set_header(&header);
    }

    /// Sets the tombstone flag.
    pub fn set_deleted(&mut self, deleted: bool) {
        let mut header = self.header();
        header.deleted = u8::from(deleted);
        self.set_header(&header);
    }

    /// Replaces the whole record.
    ///
    /// # Panics
    ///
    /// Panics if the replacement has a different size.
    pub fn overwrite(&mut self, record: &[u8]) {
        assert_eq!(record.len(), self.bytes.len(), "tuple size changed");
        self.bytes.copy_from_slice(record);
    }
}

/// An owned, decoded tuple record used by the insert path while the
/// node's edges are still being assembled.
#[derive(Clone, Debug)]
pub struct OwnedTuple {
    /// The record header.
    pub header: TupleHeader,
    /// The inline vector.
    pub vector: Vec<f32>,
    /// The live neighbor entries.
    pub neighbors: Vec<Neighbor>,
}

impl OwnedTuple {
    /// Decodes a record from page bytes.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Self {
        let view = TupleView::new(bytes);
        Self {
            header: *view.header(),
            vector: view.vector().to_vec(),
            neighbors: view.neighbors().to_vec(),
        }
    }

    /// Serializes the record back to its fixed size.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.header.size_tuple as usize];
        let mut header = self.header;
        header.out_degree = self.neighbors.len() as u32;
        bytes[..TUPLE_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        let vec_end = TUPLE_HEADER_SIZE + self.vector.len() * 4;
        bytes[TUPLE_HEADER_SIZE..vec_end].copy_from_slice(bytemuck::cast_slice(&self.vector));
        let start = header.offset_out_links as usize;
        let end = start + self.neighbors.len() * NEIGHBOR_SIZE;
        bytes[start..end].copy_from_slice(bytemuck::cast_slice(&self.neighbors));
        bytes
    }
}
