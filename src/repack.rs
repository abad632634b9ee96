//! offset-overflow resolution
//!
//! When link resolution finds a 16-bit offset that cannot hold its distance,
//! the packed object graph is re-sorted breadth-first from the root and
//! re-serialized in that order, which places every object as close as
//! possible to its parents.

use std::collections::VecDeque;

use crate::serialize::{Link, Object, SerializeErrorFlags, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RepackError {
    InvalidObjIndex,
    InvalidLinkPosition,
    /// the sort visited fewer objects than the graph holds: a cycle or an
    /// unreachable object
    OrphanedNodes,
    Serialize(SerializeErrorFlags),
}

#[derive(Default, Debug)]
struct Vertex {
    head: usize,
    tail: usize,
    links: Vec<Link>,
    incoming_edges: usize,
}

impl Vertex {
    fn from_object(obj: &Object) -> Self {
        let mut links = obj.links.clone();
        links.sort_by_key(|l| l.position);
        Self {
            head: obj.head,
            tail: obj.tail,
            links,
            incoming_edges: 0,
        }
    }

    fn table_size(&self) -> usize {
        self.tail - self.head
    }

    fn link_positions_valid(&self, num_objs: usize) -> bool {
        let table_size = self.table_size();
        for link in &self.links {
            if link.objidx >= num_objs {
                return false;
            }
            let end = link.position as usize + link.width.byte_len();
            if end > table_size {
                return false;
            }
        }
        true
    }
}

pub(crate) struct Graph {
    // vertex indices match the serializer's packed object indices;
    // index 0 is the nil object and the last index is the root
    vertices: Vec<Vertex>,
    data: Vec<u8>,
    ordering: Vec<usize>,
}

impl Graph {
    pub(crate) fn from_serializer(s: &Serializer) -> Result<Self, RepackError> {
        let packed = s.packed_objects();
        let count = packed.len();
        let mut vertices = Vec::with_capacity(count);
        let mut data = Vec::new();
        for obj in packed {
            let mut v = Vertex::from_object(obj);
            if !v.link_positions_valid(count) {
                return Err(RepackError::InvalidLinkPosition);
            }
            // own a compact copy of the object bytes
            let bytes = s.object_data(obj);
            v.head = data.len();
            data.extend_from_slice(bytes);
            v.tail = data.len();
            vertices.push(v);
        }
        Ok(Graph {
            vertices,
            data,
            ordering: Vec::with_capacity(count),
        })
    }

    fn root_idx(&self) -> usize {
        self.vertices.len() - 1
    }

    /// Breadth-first topological sort from the root, children queued in link
    /// order once all their incoming edges are accounted for.
    pub(crate) fn sort_bfs(&mut self) -> Result<(), RepackError> {
        let count = self.vertices.len();
        for v in self.vertices.iter_mut() {
            v.incoming_edges = 0;
        }
        for idx in 0..count {
            for i in 0..self.vertices[idx].links.len() {
                let child = self.vertices[idx].links[i].objidx;
                if child >= count {
                    return Err(RepackError::InvalidObjIndex);
                }
                self.vertices[child].incoming_edges += 1;
            }
        }

        self.ordering.clear();
        let mut queue = VecDeque::new();
        queue.push_back(self.root_idx());
        let mut removed_edges = vec![0_usize; count];
        while let Some(next_idx) = queue.pop_front() {
            self.ordering.push(next_idx);
            for link in &self.vertices[next_idx].links {
                let child_idx = link.objidx;
                removed_edges[child_idx] += 1;
                if removed_edges[child_idx] == self.vertices[child_idx].incoming_edges {
                    queue.push_back(child_idx);
                }
            }
        }

        // nil (index 0) is never linked and does not participate
        if self.ordering.len() != count - 1 {
            return Err(RepackError::OrphanedNodes);
        }
        Ok(())
    }

    /// Re-serialize in sorted order; children pack first so their indices
    /// exist when a parent re-adds its links.
    pub(crate) fn serialize(&self) -> Result<Vec<u8>, RepackError> {
        let total: usize = self.vertices.iter().map(Vertex::table_size).sum();
        let mut s = Serializer::new(total as u32);
        s.start_serialize().map_err(RepackError::Serialize)?;

        let mut id_map = vec![0_usize; self.vertices.len()];
        for i in self.ordering.iter().rev() {
            let v = &self.vertices[*i];
            s.push().map_err(RepackError::Serialize)?;
            let start = s
                .embed_bytes(&self.data[v.head..v.tail])
                .map_err(RepackError::Serialize)?;
            for link in &v.links {
                let pos = start + link.position as usize;
                s.add_link(
                    pos..pos + link.width.byte_len(),
                    id_map[link.objidx],
                    link.whence,
                    link.bias,
                    link.is_signed,
                )
                .map_err(RepackError::Serialize)?;
            }
            let new_idx = s
                .pop_pack(false)
                .ok_or(RepackError::Serialize(s.error()))?;
            id_map[*i] = new_idx;
        }
        s.end_serialize();
        if s.in_error() {
            // still overflowing after one reorder: give up on the table
            return Err(RepackError::Serialize(s.error()));
        }
        s.copy_bytes().map_err(RepackError::Serialize)
    }
}

/// Re-sort the packed graph and emit it again.
///
/// Called when the serializer finished with nothing but an offset overflow;
/// returns the repacked bytes or the error that makes the table unusable.
pub(crate) fn resolve_overflows(s: &Serializer) -> Result<Vec<u8>, RepackError> {
    let mut graph = Graph::from_serializer(s)?;
    graph.sort_bfs()?;
    graph.serialize()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::serialize::OffsetWhence;

    // root with two 16-bit links; a large sibling packed between the root
    // and a small target forces an overflow that BFS reordering fixes
    fn overflowing_serializer() -> Serializer {
        let mut s = Serializer::new(0x30000);
        s.start_serialize().unwrap();
        let pos_near = s.embed(0_u16).unwrap();
        let pos_big = s.embed(0_u16).unwrap();

        s.push().unwrap();
        s.embed_bytes(&[0xAA, 0xBB]).unwrap();
        let near = s.pop_pack(false).unwrap();

        s.push().unwrap();
        s.embed_bytes(&vec![0x11; 0x10000]).unwrap();
        let big = s.pop_pack(false).unwrap();

        s.add_link(pos_near..pos_near + 2, near, OffsetWhence::Head, 0, false)
            .unwrap();
        s.add_link(pos_big..pos_big + 2, big, OffsetWhence::Head, 0, false)
            .unwrap();
        s.end_serialize();
        s
    }

    #[test]
    fn bfs_resolves_16bit_overflow() {
        let s = overflowing_serializer();
        assert!(s.in_error());
        assert!(s.only_offset_overflow());

        let out = resolve_overflows(&s).unwrap();
        assert_eq!(out.len(), 4 + 2 + 0x10000);
        // the BFS order puts the near target right after the root
        let near_off = u16::from_be_bytes([out[0], out[1]]) as usize;
        let big_off = u16::from_be_bytes([out[2], out[3]]) as usize;
        assert_eq!(&out[near_off..near_off + 2], &[0xAA, 0xBB]);
        assert_eq!(out[big_off], 0x11);
        assert!(near_off <= 6 && big_off <= 8);
    }

    #[test]
    fn shared_child_packs_once() {
        let mut s = Serializer::new(1024);
        s.start_serialize().unwrap();
        let pos_a = s.embed(0_u16).unwrap();
        let pos_b = s.embed(0_u16).unwrap();

        s.push().unwrap();
        s.embed_bytes(&[7, 7, 7, 7]).unwrap();
        let shared = s.pop_pack(true).unwrap();

        s.add_link(pos_a..pos_a + 2, shared, OffsetWhence::Head, 0, false)
            .unwrap();
        s.add_link(pos_b..pos_b + 2, shared, OffsetWhence::Head, 0, false)
            .unwrap();
        s.end_serialize();
        assert!(s.successful());

        // repack of a healthy graph must reproduce an equivalent table
        let out = resolve_overflows(&s).unwrap();
        let off_a = u16::from_be_bytes([out[0], out[1]]) as usize;
        let off_b = u16::from_be_bytes([out[2], out[3]]) as usize;
        assert_eq!(off_a, off_b);
        assert_eq!(&out[off_a..off_a + 4], &[7, 7, 7, 7]);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn diamond_with_cross_edge_keeps_topological_order() {
        // root -> a, root -> b, b -> a: a must pack after b is accounted
        let mut s = Serializer::new(256);
        s.start_serialize().unwrap();
        let pos_a = s.embed(0_u16).unwrap();
        let pos_b = s.embed(0_u16).unwrap();

        s.push().unwrap();
        s.embed_bytes(&[1, 1]).unwrap();
        let a = s.pop_pack(false).unwrap();

        s.push().unwrap();
        let inner = s.embed(0_u16).unwrap();
        s.add_link(inner..inner + 2, a, OffsetWhence::Head, 0, false)
            .unwrap();
        let b = s.pop_pack(false).unwrap();

        s.add_link(pos_a..pos_a + 2, a, OffsetWhence::Head, 0, false)
            .unwrap();
        s.add_link(pos_b..pos_b + 2, b, OffsetWhence::Head, 0, false)
            .unwrap();
        s.end_serialize();
        assert!(s.successful());

        let out = resolve_overflows(&s).unwrap();
        assert_eq!(out.len(), 8);
        let off_a = u16::from_be_bytes([out[0], out[1]]) as usize;
        let off_b = u16::from_be_bytes([out[2], out[3]]) as usize;
        let off_b_to_a = u16::from_be_bytes([out[off_b], out[off_b + 1]]) as usize;
        assert_eq!(&out[off_a..off_a + 2], &[1, 1]);
        assert_eq!(off_b + off_b_to_a, off_a);
    }
}
