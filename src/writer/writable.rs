//! The node type of the writer tree and the walker that drives it.
//!
//! Ownership between nodes is strictly tree-shaped: a parent owns its
//! children and children never point back. Cross-references (a thread entry
//! pointing at its context blob, the header pointing at the directory) are
//! resolved by each parent reading its own children's locations once the
//! layout pass has assigned them, so no interior mutability survives a
//! freeze.

use super::{Result, assign_checked};
use crate::file_writer::FileWriterInterface;
use crate::minidump_format::*;

/// Lifecycle of a node. States only ever advance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum WritableState {
    /// Under construction; no layout has been computed.
    Mutable,
    /// Contents are locked; size and children are now fixed.
    Frozen,
    /// The layout pass has assigned this node its file offset.
    WillWriteAtOffset,
    /// Cross-references into this node's structures are patched; ready to
    /// emit bytes.
    Writable,
    /// Bytes are in the file.
    Written,
}

/// State every node carries: its lifecycle position and, from the layout
/// pass onwards, the `{offset, size}` it will occupy in the file.
#[derive(Debug)]
pub struct WritableBase {
    state: WritableState,
    location: MDLocationDescriptor,
}

impl Default for WritableBase {
    fn default() -> Self {
        Self::new()
    }
}

impl WritableBase {
    pub fn new() -> Self {
        Self {
            state: WritableState::Mutable,
            location: MDLocationDescriptor {
                data_size: 0,
                rva: 0,
            },
        }
    }

    pub fn state(&self) -> WritableState {
        self.state
    }

    /// The node's final `{offset, size}`. Valid once laid out.
    pub fn location(&self) -> MDLocationDescriptor {
        debug_assert!(self.state >= WritableState::WillWriteAtOffset);
        self.location.clone()
    }

    /// The node's final file offset. Valid once laid out.
    pub fn rva(&self) -> MDRVA {
        debug_assert!(self.state >= WritableState::WillWriteAtOffset);
        self.location.rva
    }

    pub(crate) fn advance(&mut self, from: WritableState, to: WritableState) {
        debug_assert_eq!(self.state, from);
        debug_assert!(to > from);
        self.state = to;
    }

    pub(crate) fn set_location(&mut self, offset: u64, size: u64) -> Result<()> {
        self.location = MDLocationDescriptor {
            data_size: assign_checked("data_size", size)?,
            rva: assign_checked("rva", offset)?,
        };
        self.advance(WritableState::Frozen, WritableState::WillWriteAtOffset);
        Ok(())
    }
}

/// A region of the output file.
///
/// Implementations emit only their own bytes from [`write_object`]; children
/// emit themselves when the walker reaches them.
///
/// [`write_object`]: Writable::write_object
pub trait Writable {
    fn base(&self) -> &WritableBase;
    fn base_mut(&mut self) -> &mut WritableBase;

    /// Locks the node's contents. Counts and derived byte buffers are
    /// computed here; failures (range overflow, missing required data) abort
    /// the dump before anything is written.
    fn freeze(&mut self) -> Result<()> {
        Ok(())
    }

    /// The node's own contribution in bytes, excluding children. Valid once
    /// frozen.
    fn size_of_object(&self) -> u64;

    /// Required alignment of the node's first byte. The format's natural
    /// alignment is 4; wider data (AMD64/ARM64 context blobs, the
    /// stack-trace stream) overrides this.
    fn alignment(&self) -> u64 {
        4
    }

    /// The node's children, in the order their bytes follow this node.
    fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
        Vec::new()
    }

    /// Patches this node's raw structures with the locations of its
    /// children. Runs after the whole tree is laid out and strictly before
    /// any bytes are emitted; children are resolved before their parent.
    fn resolve(&mut self) -> Result<()> {
        Ok(())
    }

    /// Emits exactly [`size_of_object`](Writable::size_of_object) bytes.
    fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()>;
}

/// Pass 1a: lock every node, depth first, parents before children.
pub(crate) fn freeze_tree(node: &mut dyn Writable) -> Result<()> {
    node.freeze()?;
    node.base_mut()
        .advance(WritableState::Mutable, WritableState::Frozen);

    for child in node.children_mut() {
        freeze_tree(child)?;
    }
    Ok(())
}

/// Pass 1b: assign offsets. A node's own bytes land at `offset` (padded up
/// to its alignment); each child's subtree follows in `children()` order.
pub(crate) fn layout_tree(node: &mut dyn Writable, offset: &mut u64) -> Result<()> {
    let alignment = node.alignment();
    debug_assert!(alignment.is_power_of_two());
    let misalignment = *offset % alignment;
    if misalignment != 0 {
        *offset += alignment - misalignment;
    }

    let size = node.size_of_object();
    node.base_mut().set_location(*offset, size)?;
    *offset += size;

    for child in node.children_mut() {
        layout_tree(child, offset)?;
    }
    Ok(())
}

/// Pass 1c: patch cross-references, children before parents.
pub(crate) fn resolve_tree(node: &mut dyn Writable) -> Result<()> {
    for child in node.children_mut() {
        resolve_tree(child)?;
    }

    node.resolve()?;
    node.base_mut()
        .advance(WritableState::WillWriteAtOffset, WritableState::Writable);
    Ok(())
}

/// Pass 2: emit bytes in layout order, reproducing the same padding.
///
/// `position` is relative to the start of the minidump, which may itself sit
/// at a non-zero `file_base` within the underlying file.
pub(crate) fn write_tree(
    node: &mut dyn Writable,
    writer: &mut dyn FileWriterInterface,
    position: &mut u64,
    file_base: u64,
) -> Result<()> {
    let location = node.base().location();
    let target = u64::from(location.rva);
    debug_assert!(target >= *position);
    write_padding(writer, target - *position)?;

    node.write_object(writer)?;
    node.base_mut()
        .advance(WritableState::Writable, WritableState::Written);
    *position = target + u64::from(location.data_size);

    #[cfg(debug_assertions)]
    {
        let actual = writer.current_offset()?;
        debug_assert_eq!(
            actual - file_base,
            *position,
            "node emitted a different number of bytes than it declared"
        );
    }
    #[cfg(not(debug_assertions))]
    let _ = file_base;

    for child in node.children_mut() {
        write_tree(child, writer, position, file_base)?;
    }
    Ok(())
}

fn write_padding(writer: &mut dyn FileWriterInterface, len: u64) -> Result<()> {
    // Padding only ever fills up to the next 16-byte boundary
    const ZEROS: [u8; 16] = [0; 16];

    let mut remaining = len;
    while remaining > 0 {
        let chunk = remaining.min(ZEROS.len() as u64) as usize;
        writer.write(&ZEROS[..chunk])?;
        remaining -= chunk as u64;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_writer::BufferWriter;
    use crate::writer::WriterError;

    /// Leaf node holding a run of identical bytes, for walking the tree
    /// machinery without dragging real streams in.
    struct TestLeaf {
        base: WritableBase,
        fill: u8,
        len: u64,
        alignment: u64,
    }

    impl TestLeaf {
        fn new(fill: u8, len: u64, alignment: u64) -> Self {
            Self {
                base: WritableBase::new(),
                fill,
                len,
                alignment,
            }
        }
    }

    impl Writable for TestLeaf {
        fn base(&self) -> &WritableBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut WritableBase {
            &mut self.base
        }

        fn size_of_object(&self) -> u64 {
            self.len
        }

        fn alignment(&self) -> u64 {
            self.alignment
        }

        fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
            writer.write(&vec![self.fill; self.len as usize])?;
            Ok(())
        }
    }

    struct TestParent {
        base: WritableBase,
        own: u64,
        children: Vec<TestLeaf>,
    }

    impl Writable for TestParent {
        fn base(&self) -> &WritableBase {
            &self.base
        }

        fn base_mut(&mut self) -> &mut WritableBase {
            &mut self.base
        }

        fn size_of_object(&self) -> u64 {
            self.own
        }

        fn children_mut(&mut self) -> Vec<&mut dyn Writable> {
            self.children
                .iter_mut()
                .map(|child| child as &mut dyn Writable)
                .collect()
        }

        fn write_object(&mut self, writer: &mut dyn FileWriterInterface) -> Result<()> {
            writer.write(&vec![0xee; self.own as usize])?;
            Ok(())
        }
    }

    fn run_both_passes(root: &mut dyn Writable) -> Vec<u8> {
        freeze_tree(root).unwrap();
        let mut offset = 0;
        layout_tree(root, &mut offset).unwrap();
        resolve_tree(root).unwrap();

        let mut sink = BufferWriter::new();
        let mut position = 0;
        write_tree(root, &mut sink, &mut position, 0).unwrap();
        sink.into_inner()
    }

    #[test]
    fn children_follow_their_parent_in_declaration_order() {
        let mut root = TestParent {
            base: WritableBase::new(),
            own: 4,
            children: vec![TestLeaf::new(0x11, 3, 4), TestLeaf::new(0x22, 2, 4)],
        };

        let bytes = run_both_passes(&mut root);

        // parent, first child, one pad byte, second child
        assert_eq!(
            bytes,
            [0xee, 0xee, 0xee, 0xee, 0x11, 0x11, 0x11, 0x00, 0x22, 0x22]
        );
        assert_eq!(root.children[0].base().rva(), 4);
        assert_eq!(root.children[1].base().rva(), 8);
    }

    #[test]
    fn alignment_pads_with_zeros_and_minimum_distance() {
        let mut root = TestParent {
            base: WritableBase::new(),
            own: 2,
            children: vec![TestLeaf::new(0xaa, 1, 16)],
        };

        let bytes = run_both_passes(&mut root);

        assert_eq!(bytes.len(), 17);
        assert_eq!(&bytes[2..16], &[0u8; 14]);
        assert_eq!(bytes[16], 0xaa);
        assert_eq!(root.children[0].base().rva() % 16, 0);
    }

    #[test]
    fn states_progress_forward_through_the_passes() {
        let mut leaf = TestLeaf::new(0, 4, 4);
        assert_eq!(leaf.base().state(), WritableState::Mutable);

        freeze_tree(&mut leaf).unwrap();
        assert_eq!(leaf.base().state(), WritableState::Frozen);

        let mut offset = 0;
        layout_tree(&mut leaf, &mut offset).unwrap();
        assert_eq!(leaf.base().state(), WritableState::WillWriteAtOffset);

        resolve_tree(&mut leaf).unwrap();
        assert_eq!(leaf.base().state(), WritableState::Writable);

        let mut sink = BufferWriter::new();
        let mut position = 0;
        write_tree(&mut leaf, &mut sink, &mut position, 0).unwrap();
        assert_eq!(leaf.base().state(), WritableState::Written);
    }

    #[test]
    fn layout_rejects_offsets_beyond_u32() {
        let mut leaf = TestLeaf::new(0, 8, 4);
        freeze_tree(&mut leaf).unwrap();

        let mut offset = u64::from(u32::MAX) + 1;
        let err = layout_tree(&mut leaf, &mut offset).unwrap_err();
        assert!(matches!(
            err,
            WriterError::OutOfRange { field: "rva", .. }
        ));
    }
}
