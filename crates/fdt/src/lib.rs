//! `rill-fdt` — a `no_std` Flattened Device Tree (DTB) parser.
//!
//! Reifies the firmware-supplied FDT blob into an in-memory arena: a dense
//! vector of [`Node`]s addressed by [`NodeId`], plus a `phandle -> NodeId`
//! table. Parsing happens exactly once at boot; the returned [`DeviceTree`]
//! borrows the original blob, so property payloads are zero-copy slices
//! into firmware memory that must outlive the tree.
//!
//! ```ignore
//! let dt = DeviceTree::parse(fdt_bytes)?;
//! for (name, id) in dt.node(NodeId::ROOT).children() {
//!     let node = dt.node(*id);
//!     if node.is_compatible("riscv,plic0") {
//!         // ...
//!     }
//! }
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod error;
mod header;
mod node;
mod property;
mod reservation;

pub use error::FdtError;
pub use node::{Node, NodeId};
pub use property::{
    InterruptsExtendedEntry, InterruptsExtendedIter, Property, RegEntry, RegIter, StrListIter,
};
pub use reservation::{MemReservation, MemReservationIter};

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use header::{align4, read_be32, FdtHeader, FDT_MAGIC, HEADER_SIZE};
use node::{Node as NodeImpl, FDT_BEGIN_NODE, FDT_END, FDT_END_NODE, FDT_NOP, FDT_PROP};

/// Conventional default cell widths used by the Devicetree Specification
/// when an ancestor declares neither `#address-cells` nor `#size-cells`.
const DEFAULT_ADDRESS_CELLS: u32 = 2;
const DEFAULT_SIZE_CELLS: u32 = 1;

/// A parsed, immutable device tree.
///
/// `nodes[0]` is always the root. Built once from an FDT blob and never
/// mutated afterwards.
pub struct DeviceTree<'a> {
    nodes: Vec<NodeImpl<'a>>,
    phandle_table: BTreeMap<u32, NodeId>,
    reservations: &'a [u8],
}

impl<'a> DeviceTree<'a> {
    /// Parses an FDT blob into an in-memory tree.
    ///
    /// Validates the header magic, then walks the structure-block token
    /// stream: the stream must open with exactly one `BEGIN_NODE` carrying
    /// an empty name (the root) and close with `END`. Parsing is all-or-
    /// nothing — there is no partial-tree recovery on error.
    pub fn parse(data: &'a [u8]) -> Result<Self, FdtError> {
        if data.len() < HEADER_SIZE {
            return Err(FdtError::InvalidDeviceTree("blob shorter than FDT header"));
        }
        let header = FdtHeader::read(data).ok_or(FdtError::InvalidDeviceTree("truncated header"))?;
        if header.magic != FDT_MAGIC {
            return Err(FdtError::MagicMismatch);
        }

        let struct_off = header.off_dt_struct as usize;
        let struct_len = header.size_dt_struct as usize;
        let strings_off = header.off_dt_strings as usize;
        let strings_len = header.size_dt_strings as usize;

        let struct_end = struct_off
            .checked_add(struct_len)
            .ok_or(FdtError::InvalidDeviceTree("structure block overflow"))?;
        let strings_end = strings_off
            .checked_add(strings_len)
            .ok_or(FdtError::InvalidDeviceTree("strings block overflow"))?;
        if struct_end > data.len() || strings_end > data.len() {
            return Err(FdtError::InvalidDeviceTree("block extends past blob end"));
        }

        let struct_block = &data[struct_off..struct_end];
        let strings_block = &data[strings_off..strings_end];

        let mut parser = Parser {
            struct_block,
            strings_block,
            nodes: Vec::new(),
            phandle_table: BTreeMap::new(),
        };

        let tag = read_be32(struct_block, 0).ok_or(FdtError::InvalidDeviceTree("empty structure block"))?;
        if tag != FDT_BEGIN_NODE {
            return Err(FdtError::InvalidDeviceTree(
                "structure block does not open with BEGIN_NODE",
            ));
        }
        let name = str_from(struct_block, 4).ok_or(FdtError::InvalidDeviceTree("unterminated root name"))?;
        if !name.is_empty() {
            return Err(FdtError::InvalidDeviceTree("root node name is not empty"));
        }
        let content_offset = align4(4 + name.len() + 1);

        let (root_id, next_offset) =
            parser.parse_node_body(NodeId::ROOT_SENTINEL, name, content_offset)?;
        debug_assert_eq!(root_id, NodeId::ROOT);

        let end_tag = read_be32(struct_block, next_offset)
            .ok_or(FdtError::InvalidDeviceTree("missing END token"))?;
        if end_tag != FDT_END {
            return Err(FdtError::InvalidDeviceTree(
                "structure block does not close with END",
            ));
        }

        let rsvmap_off = header.off_mem_rsvmap as usize;
        if rsvmap_off > data.len() {
            return Err(FdtError::InvalidDeviceTree("off_mem_rsvmap past blob end"));
        }
        let reservations = &data[rsvmap_off..];

        Ok(DeviceTree {
            nodes: parser.nodes,
            phandle_table: parser.phandle_table,
            reservations,
        })
    }

    /// Iterates the memory-reservation block: physical ranges firmware has
    /// set aside that the page allocator must not hand out.
    pub fn memory_reservations(&self) -> MemReservationIter<'a> {
        MemReservationIter::new(self.reservations)
    }

    /// Returns the node at `id`.
    pub fn node(&self, id: NodeId) -> &Node<'a> {
        &self.nodes[id.index()]
    }

    /// Total number of nodes in the tree, including the root.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Resolves a `phandle` value to the node that declared it.
    pub fn resolve_phandle(&self, phandle: u32) -> Option<NodeId> {
        self.phandle_table.get(&phandle).copied()
    }

    /// Finds a direct child of `parent` by name.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.node(parent)
            .children()
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, id)| *id)
    }

    /// Depth-first search for the first node whose `compatible` list
    /// contains `compatible`.
    pub fn find_compatible(&self, compatible: &str) -> Option<NodeId> {
        self.find_compatible_from(NodeId::ROOT, compatible)
    }

    fn find_compatible_from(&self, start: NodeId, compatible: &str) -> Option<NodeId> {
        if self.node(start).is_compatible(compatible) {
            return Some(start);
        }
        for (_, child) in self.node(start).children() {
            if let Some(found) = self.find_compatible_from(*child, compatible) {
                return Some(found);
            }
        }
        None
    }

    /// Iterates every node in the tree in pre-order (root first), yielding
    /// `(NodeId, &Node)` pairs. Used by the module registry to walk the
    /// whole tree matching `compatible` strings against drivers.
    pub fn iter_preorder(&self) -> PreorderIter<'_, 'a> {
        PreorderIter {
            tree: self,
            stack: alloc::vec![NodeId::ROOT],
        }
    }

    /// Nearest ancestor's `#address-cells`, starting the search at `id`
    /// itself and walking up through `parent` links. `None` if no ancestor
    /// (including the root) declares one.
    pub fn effective_address_cells(&self, id: NodeId) -> Option<u32> {
        self.walk_up_for_cells(id, |p| matches!(p, Property::AddressCells(_)))
            .map(|p| match p {
                Property::AddressCells(v) => v,
                _ => unreachable!(),
            })
    }

    /// Nearest ancestor's `#size-cells`, same search order as
    /// [`Self::effective_address_cells`].
    pub fn effective_size_cells(&self, id: NodeId) -> Option<u32> {
        self.walk_up_for_cells(id, |p| matches!(p, Property::SizeCells(_)))
            .map(|p| match p {
                Property::SizeCells(v) => v,
                _ => unreachable!(),
            })
    }

    fn walk_up_for_cells(
        &self,
        mut id: NodeId,
        pred: impl Fn(&Property<'a>) -> bool,
    ) -> Option<Property<'a>> {
        if id == NodeId::ROOT_SENTINEL {
            // Called on the root's own (nonexistent) parent.
            return None;
        }
        loop {
            if let Some(p) = self.node(id).properties().iter().find(|p| pred(p)) {
                return Some(*p);
            }
            if id == NodeId::ROOT {
                return None;
            }
            id = self.node(id).parent();
        }
    }

    /// Returns an iterator over `node`'s `reg` property, resolving the
    /// address/size cell widths from `node`'s parent (walking further up
    /// on miss, falling back to the Devicetree Specification's
    /// conventional defaults of 2/1 at the root).
    ///
    /// Errors with [`FdtError::InvalidCellCounts`] if the payload length is
    /// not a multiple of the resolved tuple width, or
    /// [`FdtError::UnsupportedCellSize`] if a resolved cell count is
    /// neither 1 nor 2.
    pub fn reg_iter(&self, node: NodeId) -> Result<RegIter<'a>, FdtError> {
        let parent = self.node(node).parent();
        let address_cells = self.effective_address_cells(parent).unwrap_or(DEFAULT_ADDRESS_CELLS);
        let size_cells = self.effective_size_cells(parent).unwrap_or(DEFAULT_SIZE_CELLS);
        if !matches!(address_cells, 1 | 2) {
            return Err(FdtError::UnsupportedCellSize(address_cells));
        }
        if !matches!(size_cells, 1 | 2) {
            return Err(FdtError::UnsupportedCellSize(size_cells));
        }
        let Some(Property::Reg(bytes)) = self.node(node).property("reg") else {
            return Ok(RegIter::new(&[], address_cells, size_cells)?);
        };
        RegIter::new(bytes, address_cells, size_cells)
    }

    /// Returns an iterator over `node`'s `interrupts-extended` property,
    /// resolving each entry's phandle against the tree's phandle table and
    /// its specifier width against the referenced controller's own
    /// `#interrupt-cells`.
    pub fn interrupts_extended_iter(
        &self,
        node: NodeId,
    ) -> InterruptsExtendedIter<'_, impl FnMut(u32) -> Option<(NodeId, u32)> + '_> {
        let bytes = match self.node(node).property("interrupts-extended") {
            Some(Property::InterruptsExtended(b)) => *b,
            _ => &[],
        };
        InterruptsExtendedIter::new(bytes, move |phandle| {
            let target = self.resolve_phandle(phandle)?;
            let cells = self
                .node(target)
                .properties()
                .iter()
                .find_map(|p| match p {
                    Property::InterruptCells(v) => Some(*v),
                    _ => None,
                })
                .unwrap_or(1);
            Some((target, cells))
        })
    }
}

/// Pre-order iterator over every node in a [`DeviceTree`].
pub struct PreorderIter<'t, 'a> {
    tree: &'t DeviceTree<'a>,
    stack: Vec<NodeId>,
}

impl<'t, 'a> Iterator for PreorderIter<'t, 'a> {
    type Item = (NodeId, &'t Node<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id);
        // Push in reverse so children are visited in declaration order.
        for (_, child) in node.children().iter().rev() {
            self.stack.push(*child);
        }
        Some((id, node))
    }
}

fn str_from(data: &[u8], offset: usize) -> Option<&str> {
    let bytes = data.get(offset..)?;
    let end = bytes.iter().position(|&b| b == 0)?;
    core::str::from_utf8(&bytes[..end]).ok()
}

/// Internal streaming parser over the structure/strings blocks.
struct Parser<'a> {
    struct_block: &'a [u8],
    strings_block: &'a [u8],
    nodes: Vec<NodeImpl<'a>>,
    phandle_table: BTreeMap<u32, NodeId>,
}

impl<'a> Parser<'a> {
    /// Parses one node's properties and children, given its name and the
    /// structure-block offset right after the name (already aligned).
    /// Returns the new node's id and the offset right after its matching
    /// `END_NODE`.
    fn parse_node_body(
        &mut self,
        parent: NodeId,
        name: &'a str,
        mut offset: usize,
    ) -> Result<(NodeId, usize), FdtError> {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeImpl {
            parent,
            name,
            children: Vec::new(),
            properties: Vec::new(),
        });

        loop {
            let tag = read_be32(self.struct_block, offset)
                .ok_or(FdtError::InvalidDeviceTree("truncated structure block"))?;
            match tag {
                FDT_NOP => offset += 4,
                FDT_PROP => {
                    let base = offset + 4;
                    let len = read_be32(self.struct_block, base)
                        .ok_or(FdtError::InvalidDeviceTree("truncated PROP length"))?
                        as usize;
                    let nameoff = read_be32(self.struct_block, base + 4)
                        .ok_or(FdtError::InvalidDeviceTree("truncated PROP nameoff"))?
                        as usize;
                    let data_start = base + 8;
                    let data_end = data_start
                        .checked_add(len)
                        .ok_or(FdtError::InvalidDeviceTree("PROP length overflow"))?;
                    if data_end > self.struct_block.len() {
                        return Err(FdtError::InvalidDeviceTree("PROP payload out of bounds"));
                    }
                    let value = &self.struct_block[data_start..data_end];
                    let prop_name = str_from(self.strings_block, nameoff)
                        .ok_or(FdtError::InvalidDeviceTree("unresolved property name"))?;

                    let property = typed_property(prop_name, value)?;
                    if let Property::Phandle(handle) = property {
                        self.phandle_table.insert(handle, id);
                    }
                    self.nodes[id.index()].properties.push(property);

                    offset = align4(data_end);
                }
                FDT_BEGIN_NODE => {
                    let name_start = offset + 4;
                    let child_name = str_from(self.struct_block, name_start)
                        .ok_or(FdtError::InvalidDeviceTree("unterminated node name"))?;
                    let content_offset = align4(name_start + child_name.len() + 1);
                    let (child_id, next_offset) =
                        self.parse_node_body(id, child_name, content_offset)?;
                    self.nodes[id.index()].children.push((child_name, child_id));
                    offset = next_offset;
                }
                FDT_END_NODE => return Ok((id, offset + 4)),
                _ => {
                    return Err(FdtError::InvalidDeviceTree(
                        "unexpected token where a node body element was expected",
                    ))
                }
            }
        }
    }
}

fn typed_property<'a>(name: &'a str, value: &'a [u8]) -> Result<Property<'a>, FdtError> {
    fn as_u32(v: &[u8]) -> Option<u32> {
        Some(u32::from_be_bytes(v.get(..4)?.try_into().ok()?))
    }
    fn as_u64_or_u32(v: &[u8]) -> Option<u64> {
        match v.len() {
            4 => as_u32(v).map(u64::from),
            8 => Some(u64::from_be_bytes(v.try_into().ok()?)),
            _ => None,
        }
    }
    fn as_str(v: &[u8]) -> Option<&str> {
        let bytes = if v.last() == Some(&0) { &v[..v.len() - 1] } else { v };
        core::str::from_utf8(bytes).ok()
    }

    Ok(match name {
        "compatible" => Property::Compatible(value),
        "model" => Property::Model(
            as_str(value).ok_or(FdtError::InvalidDeviceTree("model is not valid UTF-8"))?,
        ),
        "phandle" => Property::Phandle(
            as_u32(value).ok_or(FdtError::InvalidDeviceTree("phandle is not a u32"))?,
        ),
        "status" => Property::Status(
            as_str(value).ok_or(FdtError::InvalidDeviceTree("status is not valid UTF-8"))?,
        ),
        "#address-cells" => Property::AddressCells(
            as_u32(value).ok_or(FdtError::InvalidDeviceTree("#address-cells is not a u32"))?,
        ),
        "#size-cells" => Property::SizeCells(
            as_u32(value).ok_or(FdtError::InvalidDeviceTree("#size-cells is not a u32"))?,
        ),
        "reg" => Property::Reg(value),
        "ranges" => Property::Ranges(value),
        "dma-ranges" => Property::DmaRanges(value),
        "dma-coherent" => Property::DmaCoherent,
        "dma-noncoherent" => Property::DmaNoncoherent,
        "interrupts" => Property::Interrupts(value),
        "interrupt-parent" => Property::InterruptParent(
            as_u32(value).ok_or(FdtError::InvalidDeviceTree("interrupt-parent is not a u32"))?,
        ),
        "interrupts-extended" => Property::InterruptsExtended(value),
        "#interrupt-cells" => Property::InterruptCells(
            as_u32(value).ok_or(FdtError::InvalidDeviceTree("#interrupt-cells is not a u32"))?,
        ),
        "interrupt-controller" => Property::InterruptController,
        "interrupt-map" => Property::InterruptMap(value),
        "interrupt-map-mask" => Property::InterruptMapMask(value),
        "clock-frequency" => Property::ClockFrequency(
            as_u64_or_u32(value).ok_or(FdtError::InvalidDeviceTree("clock-frequency malformed"))?,
        ),
        "timebase-frequency" => Property::TimebaseFrequency(
            as_u64_or_u32(value)
                .ok_or(FdtError::InvalidDeviceTree("timebase-frequency malformed"))?,
        ),
        _ => Property::Unknown {
            name,
            raw_bytes: value,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    /// Hand-assembles a minimal FDT blob:
    /// `/ { #address-cells=<1>; #size-cells=<1>; memory@0 { reg=<0 0x1000>; }; };`
    fn minimal_fdt() -> Vec<u8> {
        let mut strings = Vec::new();
        let addr_cells_off = strings.len();
        strings.extend_from_slice(b"#address-cells\0");
        let size_cells_off = strings.len();
        strings.extend_from_slice(b"#size-cells\0");
        let reg_off = strings.len();
        strings.extend_from_slice(b"reg\0");

        let mut structure = Vec::new();
        let push_u32 = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_be_bytes());
        let push_name = |buf: &mut Vec<u8>, name: &[u8]| {
            buf.extend_from_slice(name);
            buf.push(0);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };
        let push_prop = |buf: &mut Vec<u8>, nameoff: u32, value: &[u8]| {
            push_u32(buf, FDT_PROP);
            push_u32(buf, value.len() as u32);
            push_u32(buf, nameoff);
            buf.extend_from_slice(value);
            while buf.len() % 4 != 0 {
                buf.push(0);
            }
        };

        push_u32(&mut structure, FDT_BEGIN_NODE);
        push_name(&mut structure, b"");
        push_prop(&mut structure, addr_cells_off as u32, &1u32.to_be_bytes());
        push_prop(&mut structure, size_cells_off as u32, &1u32.to_be_bytes());

        push_u32(&mut structure, FDT_BEGIN_NODE);
        push_name(&mut structure, b"memory@0");
        let mut reg_value = Vec::new();
        reg_value.extend_from_slice(&0u32.to_be_bytes());
        reg_value.extend_from_slice(&0x1000u32.to_be_bytes());
        push_prop(&mut structure, reg_off as u32, &reg_value);
        push_u32(&mut structure, FDT_END_NODE);

        push_u32(&mut structure, FDT_END_NODE);
        push_u32(&mut structure, FDT_END);

        let header_size = HEADER_SIZE;
        let struct_off = header_size;
        let struct_len = structure.len();
        let strings_off = struct_off + struct_len;
        let strings_len = strings.len();
        let total_size = strings_off + strings_len;

        let mut blob = Vec::new();
        push_u32(&mut blob, FDT_MAGIC);
        push_u32(&mut blob, total_size as u32);
        push_u32(&mut blob, struct_off as u32);
        push_u32(&mut blob, strings_off as u32);
        push_u32(&mut blob, header_size as u32); // off_mem_rsvmap (unused)
        push_u32(&mut blob, 17); // version
        push_u32(&mut blob, 16); // last_comp_version
        push_u32(&mut blob, 0); // boot_cpuid_phys
        push_u32(&mut blob, strings_len as u32);
        push_u32(&mut blob, struct_len as u32);
        blob.extend_from_slice(&structure);
        blob.extend_from_slice(&strings);
        blob
    }

    #[test]
    fn parses_minimal_tree_into_two_nodes() {
        let blob = minimal_fdt();
        let dt = DeviceTree::parse(&blob).unwrap();
        assert_eq!(dt.node_count(), 2);
    }

    #[test]
    fn memory_node_reg_yields_one_entry() {
        let blob = minimal_fdt();
        let dt = DeviceTree::parse(&blob).unwrap();
        let mem_id = dt.find_child(NodeId::ROOT, "memory@0").unwrap();
        let entries: Vec<_> = dt.reg_iter(mem_id).unwrap().collect();
        assert_eq!(entries, alloc::vec![RegEntry { addr: 0, size: 0x1000 }]);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut blob = minimal_fdt();
        blob[0] = 0;
        assert_eq!(DeviceTree::parse(&blob), Err(FdtError::MagicMismatch));
    }

    #[test]
    fn root_has_empty_name() {
        let blob = minimal_fdt();
        let dt = DeviceTree::parse(&blob).unwrap();
        assert_eq!(dt.node(NodeId::ROOT).name(), "");
    }

    #[test]
    fn effective_cells_inherit_from_root() {
        let blob = minimal_fdt();
        let dt = DeviceTree::parse(&blob).unwrap();
        let mem_id = dt.find_child(NodeId::ROOT, "memory@0").unwrap();
        assert_eq!(dt.effective_address_cells(dt.node(mem_id).parent()), Some(1));
        assert_eq!(dt.effective_size_cells(dt.node(mem_id).parent()), Some(1));
    }

    #[test]
    fn compatible_string_list_iterates_each_entry() {
        let prop = Property::Compatible(b"riscv,plic0\0sifive,plic-1.0.0\0");
        let list: Vec<&str> = prop.as_str_list().collect();
        assert_eq!(list, alloc::vec!["riscv,plic0", "sifive,plic-1.0.0"]);
    }

    #[test]
    fn find_compatible_walks_subtree() {
        let blob = minimal_fdt();
        let dt = DeviceTree::parse(&blob).unwrap();
        assert!(dt.find_compatible("nonexistent").is_none());
    }
}
