//! FWFS image assembly and byte-exact serialization.
//!
//! # Image layout
//!
//! ```text
//! ┌────────────┬─────────────────────────────────────────────────┐
//! │ Offset     │ Contents                                        │
//! ├────────────┼─────────────────────────────────────────────────┤
//! │ 0          │ start marker (u32 LE = 0x53465746, "FWFS")      │
//! │ 4          │ referenced objects, post-order: data leaves     │
//! │            │ first, then the containers that point at them,  │
//! │            │ ending with the Volume object                   │
//! │ …          │ End object (u32 checksum, reserved as zero)     │
//! │ …          │ end marker (u32 LE = 0x46574653, "SFWF")        │
//! └────────────┴─────────────────────────────────────────────────┘
//! ```
//!
//! Object IDs are sequential and 1-based in write order, and every emitted
//! object is padded to a 4-byte boundary.  A child is therefore always
//! written before any reference to it, and a reference needs at most the
//! few ID bytes the child-table entry encodes.
//!
//! Each object is emitted exactly once; re-emitting is a no-op.  The guard
//! protects against graphs where one object is referenced from multiple
//! parents, even though the present builder only produces strict trees.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::access::UserRole;
use crate::error::BuildError;
use crate::fwfs::{END_MARKER, NodeId, ObjectKind, ObjectRef, START_MARKER, Tree};

/// The End object's checksum field is reserved; firmware readers ignore it.
const END_CHECKSUM: u32 = 0;

/// A complete FWFS image under construction.
///
/// `new` builds the fixed skeleton every image carries: the Volume with its
/// inline ID32, and the anonymous root directory granting guests read and
/// admins write.  All filesystem content hangs off [`Image::root`].
pub struct Image {
    tree: Tree,
    volume: NodeId,
    root: NodeId,
}

impl Image {
    pub fn new(volume_name: &str, volume_id: u32) -> Result<Self, BuildError> {
        let mut tree = Tree::new();
        let volume = tree.new_volume(volume_name)?;
        tree.add_volume_id(volume, volume_id);
        let root = tree.add_directory(volume, "", 0)?;
        tree.append_ace(root, ObjectKind::ReadAce, UserRole::Guest);
        tree.append_ace(root, ObjectKind::WriteAce, UserRole::Admin);
        Ok(Self { tree, volume, root })
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// The anonymous root directory all image paths resolve against.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create a mount point under the root.  The target may be given with or
    /// without its leading `/`; the stored name never carries one.
    pub fn add_mount_point(&mut self, target: &str, store: u8) -> Result<NodeId, BuildError> {
        let name = target.trim_start_matches('/');
        self.tree.add_mount_point(self.root, name, store)
    }

    /// Serialize the image to `path`.  Returns the number of objects written.
    pub fn write_to_file(&mut self, path: &Path) -> Result<u32, BuildError> {
        let file = File::create(path).map_err(|e| BuildError::Io {
            context: format!("creating image {}", path.display()),
            source: e,
        })?;
        let count = self.write_to(BufWriter::new(file))?;
        tracing::info!(path = %path.display(), objects = count, "wrote image");
        Ok(count)
    }

    /// Serialize the image into `out`: prune, start marker, post-order emit
    /// of the object graph, End object, end marker.
    ///
    /// Serialization consumes the builder phase: the tree must not be
    /// mutated afterwards, since emitted offsets and IDs are now baked into
    /// reference entries.
    pub fn write_to<W: Write>(&mut self, out: W) -> Result<u32, BuildError> {
        self.tree.prune(self.volume);

        let mut writer = ObjectWriter {
            out,
            offset: 0,
            count: 0,
        };
        writer.write_raw(&START_MARKER.to_le_bytes())?;
        self.emit(&mut writer, self.volume)?;
        writer.write_object(&[ObjectKind::End as u8, 4], &END_CHECKSUM.to_le_bytes())?;
        writer.write_raw(&END_MARKER.to_le_bytes())?;
        writer.out.flush().map_err(write_error)?;
        Ok(writer.count)
    }

    /// Emit one node: referenced children first (so their IDs exist when the
    /// parent's child-table is assembled), then the node itself.
    fn emit<W: Write>(&mut self, writer: &mut ObjectWriter<W>, id: NodeId) -> Result<(), BuildError> {
        if self.tree.node(id).emitted.is_some() {
            return Ok(());
        }

        if self.tree.node(id).kind.is_named() {
            let children = self.tree.children(id).to_vec();
            for child in children {
                if self.tree.node(child).kind.is_ref() {
                    self.emit(writer, child)?;
                }
            }
        }

        let content = self.tree.content_bytes(id);
        let header = self.tree.header_bytes(id, content.len())?;
        let emitted = writer.write_object(&header, &content)?;
        self.tree.node_mut(id).emitted = Some(emitted);
        Ok(())
    }
}

/// Sequential object writer: tracks the file offset and hands out 1-based
/// IDs in write order.
struct ObjectWriter<W: Write> {
    out: W,
    offset: u32,
    count: u32,
}

impl<W: Write> ObjectWriter<W> {
    /// Marker words are written verbatim; they are not objects and get no ID.
    fn write_raw(&mut self, bytes: &[u8]) -> Result<(), BuildError> {
        self.out.write_all(bytes).map_err(write_error)?;
        self.offset += bytes.len() as u32;
        Ok(())
    }

    fn write_object(&mut self, header: &[u8], content: &[u8]) -> Result<ObjectRef, BuildError> {
        let offset = self.offset;
        self.out.write_all(header).map_err(write_error)?;
        self.out.write_all(content).map_err(write_error)?;

        let size = header.len() + content.len();
        let padding = crate::util::align_up(size) - size;
        if padding > 0 {
            self.out.write_all(&[0u8; 3][..padding]).map_err(write_error)?;
        }

        self.offset += (size + padding) as u32;
        self.count += 1;
        Ok(ObjectRef {
            offset,
            id: self.count,
        })
    }
}

fn write_error(source: std::io::Error) -> BuildError {
    BuildError::Io {
        context: "writing image".to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fwfs::REF_FLAG;

    fn image_bytes(image: &mut Image) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut buf).unwrap();
        buf
    }

    #[test]
    fn empty_volume_exact_bytes() {
        let mut image = Image::new("FWFS", 0x1234_5678).unwrap();
        let buf = image_bytes(&mut image);

        #[rustfmt::skip]
        let expected: Vec<u8> = vec![
            // start marker "FWFS"
            0x46, 0x57, 0x46, 0x53,
            // root directory, ID 1: type 0x23, content 13 bytes
            0x23, 0x0D, 0x00,
            0x00,                       // name_len = 0
            0x00, 0x00, 0x00, 0x00,     // mtime
            0x05, 0x01, 0x01, 0x00,     // inline ReadACE = guest, padded
            0x06, 0x01, 0x04, 0x00,     // inline WriteACE = admin, padded
            // volume, ID 2: type 0x21, content 20 bytes
            0x21, 0x14, 0x00,
            0x04,                       // name_len = 4
            0x00, 0x00, 0x00, 0x00,     // mtime
            b'F', b'W', b'F', b'S',     // name
            0x02, 0x04, 0x78, 0x56, 0x34, 0x12, 0x00, 0x00, // inline ID32, padded
            0xA3, 0x01, 0x01,           // reference to root (ID 1)
            0x00,                       // object padding
            // end object, ID 3
            0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // end marker "SFWF"
            0x53, 0x46, 0x57, 0x46,
        ];
        assert_eq!(buf, expected);
    }

    #[test]
    fn image_is_bracketed_by_markers() {
        let mut image = Image::new("vol", 1).unwrap();
        let buf = image_bytes(&mut image);
        assert_eq!(&buf[..4], &[0x46, 0x57, 0x46, 0x53]);
        assert_eq!(&buf[buf.len() - 4..], &[0x53, 0x46, 0x57, 0x46]);
        assert_eq!(buf.len() % 4, 0);
    }

    #[test]
    fn data_leaf_emitted_before_its_file() {
        let mut image = Image::new("vol", 0).unwrap();
        let root = image.root();
        let file = image.tree_mut().add_file(root, "hello.txt", 0).unwrap();
        image.tree_mut().append_data(file, b"hi".to_vec()).unwrap();

        let buf = image_bytes(&mut image);

        // First object after the start marker is the Data8 leaf, so it gets
        // ID 1 and the file references it with a single ID byte.
        assert_eq!(&buf[4..8], &[0x01, 0x02, b'h', b'i']);

        let tree = image.tree();
        let data = tree.find_object(file, ObjectKind::Data8).unwrap();
        assert_eq!(tree.node(data).emitted.unwrap().id, 1);
        assert_eq!(tree.node(file).emitted.unwrap().id, 2);

        let file_ref = [ObjectKind::Data8 as u8 | REF_FLAG, 1, 1];
        assert!(
            buf.windows(file_ref.len()).any(|w| w == file_ref),
            "file should reference the data leaf by ID 1"
        );
    }

    #[test]
    fn file_md5_is_inlined_into_file_object() {
        let mut image = Image::new("vol", 0).unwrap();
        let root = image.root();
        let file = image.tree_mut().add_file(root, "hello.txt", 0).unwrap();
        image.tree_mut().append_data(file, b"hi".to_vec()).unwrap();

        let buf = image_bytes(&mut image);

        // Md5Hash inline entry: type 8, length 16, MD5("hi").
        let mut entry = vec![0x08, 0x10];
        entry.extend_from_slice(&[
            0x49, 0xf6, 0x8a, 0x5c, 0x84, 0x93, 0xec, 0x2c, 0x0b, 0xf4, 0x89, 0x82, 0x1c, 0x21,
            0xfc, 0x3b,
        ]);
        assert!(buf.windows(entry.len()).any(|w| w == entry));
    }

    #[test]
    fn empty_file_loses_md5_leaf() {
        let mut image = Image::new("vol", 0).unwrap();
        let root = image.root();
        let file = image.tree_mut().add_file(root, "empty.txt", 0).unwrap();

        let buf = image_bytes(&mut image);

        assert!(image.tree().find_object(file, ObjectKind::Md5Hash).is_none());
        // No Md5Hash header with length 16 anywhere in the image.
        assert!(!buf.windows(2).any(|w| w == [0x08, 0x10]));
    }

    #[test]
    fn mount_point_carries_volume_index() {
        let mut image = Image::new("vol", 0).unwrap();
        image.add_mount_point("/mnt", 3).unwrap();

        let buf = image_bytes(&mut image);

        let tree = image.tree();
        let mp = tree.find_child(image.root(), "mnt").unwrap();
        assert_eq!(tree.node(mp).kind, ObjectKind::MountPoint);
        let indexes: Vec<_> = tree
            .children(mp)
            .iter()
            .filter(|&&c| tree.node(c).kind == ObjectKind::VolumeIndex)
            .collect();
        assert_eq!(indexes.len(), 1);

        // MountPoint content: name "mnt" then the inline VolumeIndex entry.
        #[rustfmt::skip]
        let mp_content = [
            3,                          // name_len
            0, 0, 0, 0,                 // mtime
            b'm', b'n', b't', 0,        // name + pad
            7, 1, 3, 0,                 // inline VolumeIndex = 3, padded
        ];
        assert!(buf.windows(mp_content.len()).any(|w| w == mp_content));
    }

    #[test]
    fn ids_are_sequential_in_write_order() {
        let mut image = Image::new("vol", 0).unwrap();
        let root = image.root();
        let dir = image.tree_mut().add_directory(root, "www", 0).unwrap();
        let a = image.tree_mut().add_file(dir, "a", 0).unwrap();
        let b = image.tree_mut().add_file(dir, "b", 0).unwrap();
        image.tree_mut().append_data(a, vec![1]).unwrap();
        image.tree_mut().append_data(b, vec![2]).unwrap();

        image.write_to(&mut Vec::new()).unwrap();

        let tree = image.tree();
        let id = |n: NodeId| tree.node(n).emitted.unwrap().id;
        let data_a = tree.find_object(a, ObjectKind::Data8).unwrap();
        let data_b = tree.find_object(b, ObjectKind::Data8).unwrap();

        // Post-order: a's data, a, b's data, b, dir, root, volume.
        assert_eq!(id(data_a), 1);
        assert_eq!(id(a), 2);
        assert_eq!(id(data_b), 3);
        assert_eq!(id(b), 4);
        assert_eq!(id(dir), 5);
        assert_eq!(id(root), 6);
        assert_eq!(id(image.volume), 7);
    }

    #[test]
    fn every_object_is_word_aligned() {
        let mut image = Image::new("volume-name", 0xABCD).unwrap();
        let root = image.root();
        let file = image.tree_mut().add_file(root, "odd", 0).unwrap();
        image.tree_mut().append_data(file, vec![0xEE; 7]).unwrap();

        image.write_to(&mut Vec::new()).unwrap();

        let tree = image.tree();
        let data = tree.find_object(file, ObjectKind::Data8).unwrap();
        for node in [data, file, root, image.volume] {
            assert_eq!(tree.node(node).emitted.unwrap().offset % 4, 0);
        }
    }

    #[test]
    fn deterministic_given_fixed_mtimes() {
        let build = || {
            let mut image = Image::new("FWFS", 42).unwrap();
            let root = image.root();
            let file = image.tree_mut().add_file(root, "a.txt", 1_700_000_000).unwrap();
            image.tree_mut().append_data(file, b"payload".to_vec()).unwrap();
            let mut buf = Vec::new();
            image.write_to(&mut buf).unwrap();
            buf
        };
        assert_eq!(build(), build());
    }
}
