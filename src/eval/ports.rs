// eval/ports.rs - Input port ids and pre-resolved connections
//
// At graph construction time every edge handle string ("Input", "WarpY",
// "Inputs[2]", ...) is resolved into a small integer port id and stored in a
// fixed-size per-node slot array. The scheduler then resolves a port with a
// single array index instead of a string lookup.
//
// Named ports → fixed-position array slots
// Array ports (Inputs[N]) → SmallVec sorted by N

use crate::eval::field::FieldKind;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::fmt;

// ── Port IDs ────────────────────────────────────────────────────────

pub const P_INPUT: u8 = 0;
pub const P_INPUT_A: u8 = 1;
pub const P_INPUT_B: u8 = 2;
pub const P_WARP: u8 = 3;
pub const P_WARP_Y: u8 = 4;
pub const P_FACTOR: u8 = 5;
pub const P_DISTANCE: u8 = 6;
pub const P_DEFORMATION: u8 = 7;
pub const P_VECTOR: u8 = 8;
pub const P_ALTITUDE: u8 = 9;

/// Total number of named port slots.
pub const NAMED_PORT_COUNT: usize = 10;

/// Handle used when an edge carries no `targetHandle`.
pub const DEFAULT_PORT: &str = "Input";

// u32::MAX marks an unconnected slot; 4 bytes per slot instead of 16 for
// Option<usize>.
pub const NO_INPUT: u32 = u32::MAX;

const PORT_NAMES: [&str; NAMED_PORT_COUNT] = [
    "Input",
    "InputA",
    "InputB",
    "Warp",
    "WarpY",
    "Factor",
    "Distance",
    "Deformation",
    "Vector",
    "Altitude",
];

/// Convert a handle name to a named port id.
/// Returns `None` for array handles like "Inputs[0]" or unknown handles.
pub fn port_name_to_id(name: &str) -> Option<u8> {
    PORT_NAMES
        .iter()
        .position(|&candidate| candidate == name)
        .map(|i| i as u8)
}

pub fn port_name(id: u8) -> &'static str {
    PORT_NAMES.get(id as usize).copied().unwrap_or("?")
}

// ── Port references ─────────────────────────────────────────────────

/// A port on a node: either a named slot or an element of `Inputs[..]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRef {
    Named(u8),
    Array(usize),
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortRef::Named(id) => f.write_str(port_name(*id)),
            PortRef::Array(i) => write!(f, "Inputs[{}]", i),
        }
    }
}

/// Parse a handle string into a port reference.
pub fn classify_port(handle: &str) -> Option<PortRef> {
    if let Some(id) = port_name_to_id(handle) {
        return Some(PortRef::Named(id));
    }

    if let Some(rest) = handle.strip_prefix("Inputs[") {
        if let Some(idx_str) = rest.strip_suffix(']') {
            if let Ok(idx) = idx_str.parse::<usize>() {
                return Some(PortRef::Array(idx));
            }
        }
    }

    // Bare "Inputs" is Inputs[0]
    if handle == "Inputs" {
        return Some(PortRef::Array(0));
    }

    None
}

/// One input a node kind declares: where it connects and what it accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot {
    pub port: PortRef,
    pub kind: FieldKind,
    pub required: bool,
}

impl InputSlot {
    pub const fn required(port: u8, kind: FieldKind) -> Self {
        Self {
            port: PortRef::Named(port),
            kind,
            required: true,
        }
    }

    pub const fn optional(port: u8, kind: FieldKind) -> Self {
        Self {
            port: PortRef::Named(port),
            kind,
            required: false,
        }
    }
}

// ── ResolvedInputs ──────────────────────────────────────────────────

/// Pre-resolved inputs for a single node, built once at graph construction.
#[derive(Debug, Clone)]
pub struct ResolvedInputs {
    /// `named[P_INPUT]` = source node index, or `NO_INPUT`.
    pub named: [u32; NAMED_PORT_COUNT],
    /// Source node indices of `Inputs[N]` handles, sorted by N.
    pub array_inputs: SmallVec<[u32; 8]>,
}

impl ResolvedInputs {
    pub fn new() -> Self {
        ResolvedInputs {
            named: [NO_INPUT; NAMED_PORT_COUNT],
            array_inputs: SmallVec::new(),
        }
    }

    #[inline(always)]
    pub fn has(&self, port: u8) -> bool {
        self.named[port as usize] != NO_INPUT
    }

    /// Source node index for a named port, or `None`.
    #[inline(always)]
    pub fn get(&self, port: u8) -> Option<usize> {
        let v = self.named[port as usize];
        if v == NO_INPUT {
            None
        } else {
            Some(v as usize)
        }
    }

    /// Source node index for any port reference.
    pub fn resolve(&self, port: PortRef) -> Option<usize> {
        match port {
            PortRef::Named(id) => self.get(id),
            PortRef::Array(i) => self.array_inputs.get(i).map(|&v| v as usize),
        }
    }

    /// Every connected source, named slots first.
    pub fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.named
            .iter()
            .chain(self.array_inputs.iter())
            .filter(|&&v| v != NO_INPUT)
            .map(|&v| v as usize)
    }
}

impl Default for ResolvedInputs {
    fn default() -> Self {
        Self::new()
    }
}

/// Build resolved inputs for one node from its port → source map.
///
/// Array handles are compacted in index order, so `Inputs[0]` and
/// `Inputs[5]` become the first and second array input.
pub fn resolve_inputs(port_inputs: &HashMap<PortRef, usize>) -> ResolvedInputs {
    let mut resolved = ResolvedInputs::new();
    let mut indexed: SmallVec<[(usize, u32); 8]> = SmallVec::new();

    for (&port, &source_idx) in port_inputs {
        let src = source_idx as u32;
        match port {
            PortRef::Named(id) => resolved.named[id as usize] = src,
            PortRef::Array(idx) => indexed.push((idx, src)),
        }
    }

    indexed.sort_unstable_by_key(|(idx, _)| *idx);
    resolved.array_inputs = indexed.into_iter().map(|(_, src)| src).collect();

    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_ports_round_trip_through_ids() {
        for (i, name) in PORT_NAMES.iter().enumerate() {
            assert_eq!(port_name_to_id(name), Some(i as u8));
            assert_eq!(port_name(i as u8), *name);
        }
        assert_eq!(port_name_to_id("Nope"), None);
    }

    #[test]
    fn classify_array_handles() {
        assert_eq!(classify_port("Inputs[3]"), Some(PortRef::Array(3)));
        assert_eq!(classify_port("Inputs"), Some(PortRef::Array(0)));
        assert_eq!(classify_port("WarpY"), Some(PortRef::Named(P_WARP_Y)));
        assert_eq!(classify_port("Inputs[x]"), None);
        assert_eq!(PortRef::Array(2).to_string(), "Inputs[2]");
    }

    #[test]
    fn array_inputs_sorted_by_index() {
        let mut map = HashMap::new();
        map.insert(PortRef::Array(5), 9);
        map.insert(PortRef::Array(0), 4);
        map.insert(PortRef::Array(2), 7);
        map.insert(PortRef::Named(P_FACTOR), 1);
        let ri = resolve_inputs(&map);
        assert_eq!(ri.array_inputs.as_slice(), &[4, 7, 9]);
        assert_eq!(ri.get(P_FACTOR), Some(1));
        assert!(!ri.has(P_INPUT));
        assert_eq!(ri.resolve(PortRef::Array(1)), Some(7));
        assert_eq!(ri.sources().count(), 4);
    }
}
