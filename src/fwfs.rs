//! Firmware Filesystem (FWFS) object model.
//!
//! # Background
//!
//! FWFS is a compact, read-mostly filesystem image meant to be read in place
//! by embedded firmware.  An image is a flat stream of *objects*, each with a
//! one-octet type tag, a size field whose width depends on the type, and a
//! payload.  Container objects (Volume, Directory, MountPoint, File) carry a
//! name, an mtime and a child-table; small metadata leaves (attributes,
//! ACEs, checksums) are inlined into that table, while bulky children (file
//! data, nested containers) are emitted standalone and referenced by ID.
//!
//! # Scope
//!
//! This module is the build-side object graph only: an arena of typed nodes
//! with parent/child links, metadata append rules, and the per-object byte
//! encodings.  Streaming a whole tree into an image file lives in
//! [`crate::image`]; nothing here reads images back.
//!
//! # Layout summary
//!
//! ```text
//! object     = header || content
//! header     = type octet || size field (u8, u16 LE, or u16 LE + u8 high)
//! reference  = (type | 0x80) || u8 ref_len || ID in ref_len LE bytes
//! named      = u8 name_len || u32 mtime || name (padded) || child-table
//! ```

use md5::{Digest, Md5};

use crate::access::UserRole;
use crate::error::BuildError;
use crate::util::{align_up, pad4};

/// First word of every image: "FWFS" when written little-endian.
pub const START_MARKER: u32 = 0x5346_5746;

/// Final word of every image: the start marker reversed ("SFWF").
pub const END_MARKER: u32 = 0x4657_4653;

/// Set on the type octet of a child-table entry that references a
/// standalone object instead of inlining it.
pub const REF_FLAG: u8 = 0x80;

/// On-disk object type tags.
///
/// The numeric bands encode the size-field width: 0..32 use a u8 size,
/// 32..64 a u16, 64.. a 24-bit size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    End = 0,
    Data8 = 1,
    Id32 = 2,
    ObjAttr = 3,
    Compression = 4,
    ReadAce = 5,
    WriteAce = 6,
    VolumeIndex = 7,
    Md5Hash = 8,
    Data16 = 32,
    Volume = 33,
    MountPoint = 34,
    Directory = 35,
    File = 36,
    Data24 = 64,
}

impl ObjectKind {
    /// Containers with a name, mtime and child-table.
    pub fn is_named(self) -> bool {
        matches!(
            self,
            ObjectKind::Volume | ObjectKind::MountPoint | ObjectKind::Directory | ObjectKind::File
        )
    }

    /// Objects emitted standalone and referenced by ID from the parent's
    /// child-table.  Everything else is inlined.
    pub fn is_ref(self) -> bool {
        self.is_named()
            || matches!(self, ObjectKind::Data8 | ObjectKind::Data16 | ObjectKind::Data24)
    }

    pub fn size_class(self) -> SizeClass {
        match self {
            ObjectKind::Data24 => SizeClass::Size24,
            k if (k as u8) >= ObjectKind::Data16 as u8 => SizeClass::Size16,
            _ => SizeClass::Size8,
        }
    }
}

/// Width of an object's size field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Size8,
    Size16,
    Size24,
}

impl SizeClass {
    /// Total header length: type octet plus size field.
    pub fn header_len(self) -> usize {
        match self {
            SizeClass::Size8 => 2,
            SizeClass::Size16 => 3,
            SizeClass::Size24 => 4,
        }
    }

    pub fn max_content_size(self) -> usize {
        match self {
            SizeClass::Size8 => 0xFF,
            SizeClass::Size16 => 0xFFFF,
            SizeClass::Size24 => 0xFF_FFFF,
        }
    }
}

/// Attribute bits carried by an ObjAttr leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectAttrs(pub u8);

impl ObjectAttrs {
    pub const READ_ONLY: u8 = 1 << 0;
    pub const ARCHIVE: u8 = 1 << 1;

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u8, state: bool) {
        if state {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// Fixed-width display used in the build log: one column per attribute,
    /// `R`/`A` when set, `-` when clear.
    pub fn render(self) -> String {
        let mut s = String::with_capacity(2);
        s.push(if self.contains(Self::READ_ONLY) { 'R' } else { '-' });
        s.push(if self.contains(Self::ARCHIVE) { 'A' } else { '-' });
        s
    }
}

/// Compression algorithm recorded in a Compression leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CompressionType {
    #[default]
    None = 0,
    Gzip = 1,
}

impl CompressionType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(CompressionType::None),
            "gzip" => Some(CompressionType::Gzip),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompressionType::None => "none",
            CompressionType::Gzip => "gzip",
        }
    }
}

/// Index of a node within a [`Tree`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// Emission state of an object: where it landed and which ID it was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRef {
    pub offset: u32,
    pub id: u32,
}

/// Payload of a container node.
pub struct NamedPayload {
    pub name: String,
    /// Seconds since the epoch, truncated to the u32 the format stores.
    pub mtime: u32,
    pub children: Vec<NodeId>,
    /// Bytes of data appended to this node (post-pipeline, as stored).
    pub data_size: u64,
}

/// Incremental MD5 over the bytes stored for a file.
pub struct Md5Payload {
    hasher: Md5,
    length: u64,
}

impl Md5Payload {
    fn new() -> Self {
        Self {
            hasher: Md5::new(),
            length: 0,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
        self.length += bytes.len() as u64;
    }

    pub fn digest(&self) -> [u8; 16] {
        self.hasher.clone().finalize().into()
    }

    pub fn length(&self) -> u64 {
        self.length
    }
}

pub enum Payload {
    Named(NamedPayload),
    Attr(ObjectAttrs),
    Compression {
        kind: CompressionType,
        original_size: u32,
    },
    Ace(UserRole),
    VolumeIndex(u8),
    Md5(Md5Payload),
    Id32(u32),
    Data(Vec<u8>),
}

pub struct Node {
    pub kind: ObjectKind,
    pub parent: Option<NodeId>,
    pub payload: Payload,
    pub emitted: Option<ObjectRef>,
}

impl Node {
    /// Empty leaves are discarded by [`Tree::prune`] before serialization.
    /// Currently only an MD5 leaf that was never fed any data qualifies.
    fn is_empty(&self) -> bool {
        matches!(&self.payload, Payload::Md5(md5) if md5.length == 0)
    }
}

/// Arena of FWFS objects.  Parent/child links are indices, so the tree has
/// no ownership cycles and ID assignment during the emit walk is trivial.
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Container payload accessor.  Callers hold a `NodeId` they created via
    /// one of the named constructors, so a non-named node here is a logic
    /// error in the builder itself.
    pub fn named(&self, id: NodeId) -> &NamedPayload {
        match &self.node(id).payload {
            Payload::Named(named) => named,
            _ => unreachable!("node is not a container"),
        }
    }

    pub fn named_mut(&mut self, id: NodeId) -> &mut NamedPayload {
        match &mut self.node_mut(id).payload {
            Payload::Named(named) => named,
            _ => unreachable!("node is not a container"),
        }
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.named(id).children
    }

    fn push(&mut self, parent: Option<NodeId>, kind: ObjectKind, payload: Payload) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent,
            payload,
            emitted: None,
        });
        if let Some(parent) = parent {
            self.named_mut(parent).children.push(id);
        }
        id
    }

    fn add_named(
        &mut self,
        parent: Option<NodeId>,
        kind: ObjectKind,
        name: &str,
        mtime: u32,
    ) -> Result<NodeId, BuildError> {
        if name.len() > 0xFF {
            return Err(BuildError::Validation {
                message: format!("name '{name}' exceeds 255 bytes"),
            });
        }
        if let Some(parent) = parent
            && self.find_child(parent, name).is_some()
        {
            let parent_path = match self.path(parent) {
                path if path.is_empty() => "/".to_string(),
                path => path,
            };
            return Err(BuildError::DuplicateName {
                name: name.to_string(),
                parent: parent_path,
            });
        }
        Ok(self.push(
            parent,
            kind,
            Payload::Named(NamedPayload {
                name: name.to_string(),
                mtime,
                children: Vec::new(),
                data_size: 0,
            }),
        ))
    }

    /// Create the Volume container, the single root of the arena.
    pub fn new_volume(&mut self, name: &str) -> Result<NodeId, BuildError> {
        self.add_named(None, ObjectKind::Volume, name, 0)
    }

    pub fn add_directory(
        &mut self,
        parent: NodeId,
        name: &str,
        mtime: u32,
    ) -> Result<NodeId, BuildError> {
        self.add_named(Some(parent), ObjectKind::Directory, name, mtime)
    }

    /// Create a File container.  Every file owns an MD5 leaf from birth; it
    /// is fed by [`Tree::append_data`] and pruned if it never sees data.
    pub fn add_file(
        &mut self,
        parent: NodeId,
        name: &str,
        mtime: u32,
    ) -> Result<NodeId, BuildError> {
        let file = self.add_named(Some(parent), ObjectKind::File, name, mtime)?;
        self.push(Some(file), ObjectKind::Md5Hash, Payload::Md5(Md5Payload::new()));
        Ok(file)
    }

    /// Create a MountPoint with its single VolumeIndex leaf.
    pub fn add_mount_point(
        &mut self,
        parent: NodeId,
        name: &str,
        store: u8,
    ) -> Result<NodeId, BuildError> {
        let mp = self.add_named(Some(parent), ObjectKind::MountPoint, name, 0)?;
        self.push(Some(mp), ObjectKind::VolumeIndex, Payload::VolumeIndex(store));
        Ok(mp)
    }

    pub fn add_volume_id(&mut self, volume: NodeId, value: u32) {
        self.push(Some(volume), ObjectKind::Id32, Payload::Id32(value));
    }

    // ── Lookup ───────────────────────────────────────────

    /// First direct child of `container` with the given kind.
    pub fn find_object(&self, container: NodeId, kind: ObjectKind) -> Option<NodeId> {
        self.children(container)
            .iter()
            .copied()
            .find(|&c| self.node(c).kind == kind)
    }

    /// Like [`Tree::find_object`] but walking toward the Volume when the
    /// container has no own leaf of that kind.
    pub fn find_inheritable(&self, container: NodeId, kind: ObjectKind) -> Option<NodeId> {
        match self.find_object(container, kind) {
            Some(found) => Some(found),
            None => self
                .node(container)
                .parent
                .and_then(|p| self.find_inheritable(p, kind)),
        }
    }

    /// Named child of `container` with the given name.
    pub fn find_child(&self, container: NodeId, name: &str) -> Option<NodeId> {
        self.children(container)
            .iter()
            .copied()
            .find(|&c| self.node(c).kind.is_named() && self.named(c).name == name)
    }

    /// Image path of a container.  The Volume contributes nothing, so the
    /// anonymous root directory has the empty path and its children are
    /// `/name`, `/name/sub`, and so on.
    pub fn path(&self, id: NodeId) -> String {
        match self.node(id).parent {
            None => String::new(),
            Some(parent) => {
                let sep = match self.node(parent).kind {
                    ObjectKind::Volume => "",
                    _ => "/",
                };
                format!("{}{}{}", self.path(parent), sep, self.named(id).name)
            }
        }
    }

    // ── Metadata append rules ────────────────────────────

    /// Set or clear an attribute bit, creating the ObjAttr leaf on demand.
    pub fn set_attr(&mut self, id: NodeId, bit: u8, state: bool) {
        let attr_id = match self.find_object(id, ObjectKind::ObjAttr) {
            Some(existing) => existing,
            None => self.push(Some(id), ObjectKind::ObjAttr, Payload::Attr(ObjectAttrs::default())),
        };
        if let Payload::Attr(attrs) = &mut self.node_mut(attr_id).payload {
            attrs.set(bit, state);
        }
    }

    /// Own attributes of a container, empty if it has no ObjAttr leaf.
    pub fn attrs(&self, id: NodeId) -> ObjectAttrs {
        match self.find_object(id, ObjectKind::ObjAttr) {
            Some(attr_id) => match &self.node(attr_id).payload {
                Payload::Attr(attrs) => *attrs,
                _ => ObjectAttrs::default(),
            },
            None => ObjectAttrs::default(),
        }
    }

    /// Replace the container's Compression leaf.  Requesting `none` leaves
    /// the node with no Compression leaf at all.
    pub fn append_compression(&mut self, id: NodeId, kind: CompressionType) {
        if let Some(existing) = self.find_object(id, ObjectKind::Compression) {
            self.remove_child(id, existing);
        }
        if kind != CompressionType::None {
            self.push(
                Some(id),
                ObjectKind::Compression,
                Payload::Compression {
                    kind,
                    original_size: 0,
                },
            );
        }
    }

    /// Own compression of a container, `none` if it has no leaf.
    pub fn compression(&self, id: NodeId) -> CompressionType {
        match self.find_object(id, ObjectKind::Compression) {
            Some(c) => match self.node(c).payload {
                Payload::Compression { kind, .. } => kind,
                _ => CompressionType::None,
            },
            None => CompressionType::None,
        }
    }

    /// Record the pre-compression length once a compressed payload is kept.
    pub fn set_compression_original_size(&mut self, id: NodeId, size: u32) {
        if let Some(c) = self.find_object(id, ObjectKind::Compression)
            && let Payload::Compression { original_size, .. } = &mut self.node_mut(c).payload
        {
            *original_size = size;
        }
    }

    /// Strip the container's Compression leaf (compression did not shrink).
    pub fn remove_compression(&mut self, id: NodeId) {
        if let Some(existing) = self.find_object(id, ObjectKind::Compression) {
            self.remove_child(id, existing);
        }
    }

    /// Append an ACE so the tree only records roles where the value changes:
    /// if the inherited ACE already grants `role`, nothing is added; if this
    /// container already owns an ACE of that kind, it is updated in place.
    pub fn append_ace(&mut self, id: NodeId, kind: ObjectKind, role: UserRole) {
        debug_assert!(matches!(kind, ObjectKind::ReadAce | ObjectKind::WriteAce));
        if let Some(ace_id) = self.find_inheritable(id, kind) {
            let current = match self.node(ace_id).payload {
                Payload::Ace(r) => r,
                _ => UserRole::None,
            };
            if current == role {
                return;
            }
            if self.node(ace_id).parent == Some(id) {
                self.node_mut(ace_id).payload = Payload::Ace(role);
                return;
            }
        }
        self.push(Some(id), kind, Payload::Ace(role));
    }

    /// Effective (inherited) role for an ACE kind; `none` when no ancestor
    /// carries one.
    pub fn ace_role(&self, id: NodeId, kind: ObjectKind) -> UserRole {
        match self.find_inheritable(id, kind) {
            Some(ace_id) => match self.node(ace_id).payload {
                Payload::Ace(role) => role,
                _ => UserRole::None,
            },
            None => UserRole::None,
        }
    }

    fn remove_child(&mut self, parent: NodeId, child: NodeId) {
        self.named_mut(parent).children.retain(|&c| c != child);
    }

    // ── Data ─────────────────────────────────────────────

    /// Append the stored bytes of a file as a data leaf, choosing the
    /// smallest size class that fits, and feed the file's MD5 leaf.
    pub fn append_data(&mut self, file: NodeId, bytes: Vec<u8>) -> Result<NodeId, BuildError> {
        let kind = match bytes.len() {
            n if n <= 0xFF => ObjectKind::Data8,
            n if n <= 0xFFFF => ObjectKind::Data16,
            n if n <= 0xFF_FFFF => ObjectKind::Data24,
            n => {
                return Err(BuildError::PayloadTooLarge {
                    path: self.path(file),
                    size: n,
                    max: 0xFF_FFFF,
                });
            }
        };

        if let Some(md5_id) = self.find_object(file, ObjectKind::Md5Hash)
            && let Payload::Md5(md5) = &mut self.node_mut(md5_id).payload
        {
            md5.update(&bytes);
        }
        self.named_mut(file).data_size += bytes.len() as u64;

        Ok(self.push(Some(file), kind, Payload::Data(bytes)))
    }

    // ── Accounting ───────────────────────────────────────

    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).len()
    }

    pub fn file_count(&self, id: NodeId, recursive: bool) -> usize {
        let mut count = 0;
        for &child in self.children(id) {
            if self.node(child).kind == ObjectKind::File {
                count += 1;
            }
            if recursive && self.node(child).kind.is_named() {
                count += self.file_count(child, true);
            }
        }
        count
    }

    /// Stored (post-pipeline) data bytes owned by this container.
    pub fn data_size(&self, id: NodeId) -> u64 {
        self.named(id).data_size
    }

    /// Pre-compression data bytes: the Compression leaf's original size when
    /// the stored bytes are compressed, the stored size otherwise.
    pub fn original_data_size(&self, id: NodeId) -> u64 {
        match self.find_object(id, ObjectKind::Compression) {
            Some(c) => match self.node(c).payload {
                Payload::Compression { original_size, .. } => original_size as u64,
                _ => self.data_size(id),
            },
            None => self.data_size(id),
        }
    }

    pub fn total_data_size(&self, id: NodeId) -> u64 {
        let mut total = self.data_size(id);
        for &child in self.children(id) {
            if self.node(child).kind.is_named() {
                total += self.total_data_size(child);
            }
        }
        total
    }

    pub fn total_original_data_size(&self, id: NodeId) -> u64 {
        let mut total = self.original_data_size(id);
        for &child in self.children(id) {
            if self.node(child).kind.is_named() {
                total += self.total_original_data_size(child);
            }
        }
        total
    }

    // ── Pruning ──────────────────────────────────────────

    /// Drop empty leaves (an MD5 over zero bytes) from the whole subtree.
    /// Runs once, immediately before serialization.
    pub fn prune(&mut self, id: NodeId) {
        let children: Vec<NodeId> = self.children(id).to_vec();
        let kept: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|&c| !self.node(c).is_empty())
            .collect();
        self.named_mut(id).children = kept.clone();
        for child in kept {
            if self.node(child).kind.is_named() {
                self.prune(child);
            }
        }
    }

    // ── Byte encodings ───────────────────────────────────

    /// Serialization header for an object with the given content length.
    /// Fails when the content does not fit the object's size class.
    pub fn header_bytes(&self, id: NodeId, content_len: usize) -> Result<Vec<u8>, BuildError> {
        let kind = self.node(id).kind;
        let class = kind.size_class();
        if content_len > class.max_content_size() {
            return Err(BuildError::ObjectTooLarge {
                path: self.describe(id),
                size: content_len,
                max: class.max_content_size(),
            });
        }
        let mut header = Vec::with_capacity(class.header_len());
        header.push(kind as u8);
        match class {
            SizeClass::Size8 => header.push(content_len as u8),
            SizeClass::Size16 => header.extend_from_slice(&(content_len as u16).to_le_bytes()),
            SizeClass::Size24 => {
                header.extend_from_slice(&((content_len & 0xFFFF) as u16).to_le_bytes());
                header.push((content_len >> 16) as u8);
            }
        }
        Ok(header)
    }

    /// Payload bytes of an object.
    ///
    /// For containers this assembles the child-table, so every referenced
    /// child must already have been emitted (the serializer's post-order
    /// walk guarantees it).
    pub fn content_bytes(&self, id: NodeId) -> Vec<u8> {
        match &self.node(id).payload {
            Payload::Named(named) => {
                let mut content = Vec::new();
                content.push(named.name.len() as u8);
                content.extend_from_slice(&named.mtime.to_le_bytes());
                content.extend_from_slice(named.name.as_bytes());
                // The name field occupies a whole number of words; with the
                // 3-byte object header and 5-byte prefix this lands the
                // child-table on a word boundary in the file.
                content.resize(5 + align_up(named.name.len()), 0);
                for &child in &named.children {
                    if self.node(child).kind.is_ref() {
                        content.extend_from_slice(&self.ref_header_bytes(child));
                    } else {
                        let child_content = self.content_bytes(child);
                        let mut entry = self
                            .header_bytes(child, child_content.len())
                            .unwrap_or_else(|_| {
                                unreachable!("inline leaf exceeds its size class")
                            });
                        entry.extend_from_slice(&child_content);
                        pad4(&mut entry);
                        content.extend_from_slice(&entry);
                    }
                }
                content
            }
            Payload::Attr(attrs) => vec![attrs.0],
            Payload::Compression {
                kind,
                original_size,
            } => {
                let mut content = vec![*kind as u8];
                content.extend_from_slice(&original_size.to_le_bytes());
                content
            }
            Payload::Ace(role) => vec![*role as u8],
            Payload::VolumeIndex(store) => vec![*store],
            Payload::Md5(md5) => md5.digest().to_vec(),
            Payload::Id32(value) => value.to_le_bytes().to_vec(),
            Payload::Data(bytes) => bytes.clone(),
        }
    }

    /// Child-table reference entry for an emitted object: tag with the top
    /// bit set, then the ID in as few little-endian bytes as it needs.
    pub fn ref_header_bytes(&self, id: NodeId) -> Vec<u8> {
        let emitted = self
            .node(id)
            .emitted
            .unwrap_or_else(|| unreachable!("referenced child emitted before parent"));
        let len = ref_len(emitted.id);
        let mut entry = Vec::with_capacity(2 + len);
        entry.push(self.node(id).kind as u8 | REF_FLAG);
        entry.push(len as u8);
        entry.extend_from_slice(&emitted.id.to_le_bytes()[..len]);
        entry
    }

    /// Human label for error messages: the path for containers, the parent
    /// path plus kind for leaves.
    fn describe(&self, id: NodeId) -> String {
        if self.node(id).kind.is_named() {
            self.path(id)
        } else {
            match self.node(id).parent {
                Some(parent) => format!("{} ({:?})", self.path(parent), self.node(id).kind),
                None => format!("({:?})", self.node(id).kind),
            }
        }
    }
}

/// Minimum little-endian byte count that can hold `id`.
pub fn ref_len(id: u32) -> usize {
    match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    }
}
