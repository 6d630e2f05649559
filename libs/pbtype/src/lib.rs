//! Compiles flattened netlists into hierarchical pb_type descriptions.
//!
//! The input is an elaborated netlist: modules, cell instances, ports and
//! nets, with string attributes on each, queried through [`NetlistView`].
//! The output is a tree of [`PbNode`]s. A node is a leaf primitive, a
//! container of child groups with their interconnect, or a host of
//! alternative modes.
//!
//! The compiler runs in stages at each level of the hierarchy:
//!
//! 1. Instances are grouped into arrays by name ([`grouping`]).
//! 2. The nets between children and the container boundary are resolved
//!    into driver-to-sink edges ([`interconnect`]).
//! 3. Edges are split into direct connections and muxes around routing
//!    instances ([`topology`]).
//! 4. Metadata is gathered from modules, instances and array elements and
//!    merged ([`metadata`]).
//!
//! Modules with modes are re-elaborated once per mode and each mode is
//! built as its own subtree ([`modes`]).
//!
//! Every problem found at one level is reported, as [`Errors`], before the
//! build gives up. Output is deterministic for a given netlist.
//!
//! # Examples
//!
//! ```
//! use pbtype::config::BuildOptions;
//! use pbtype::netlist::{CellDef, Design, Direction, ModuleDef};
//! use pbtype::build_pb_type;
//!
//! let mut lut = ModuleDef::new("LUT4");
//! lut.set_attr("blackbox", "1");
//! lut.set_attr("CLASS", "lut");
//! lut.add_port("in", Direction::Input, 4);
//! lut.add_port("out", Direction::Output, 1);
//!
//! let mut clb = ModuleDef::new("CLB");
//! let i = clb.add_port("I", Direction::Input, 4);
//! let o = clb.add_port("O", Direction::Output, 1);
//! let mut cell = CellDef::new("lut", "LUT4");
//! cell.connect("in", Direction::Input, i);
//! cell.connect("out", Direction::Output, o);
//! clb.add_cell(cell);
//!
//! let mut design = Design::new();
//! design.add_module(lut);
//! design.add_module(clb);
//!
//! let node = build_pb_type(&design, "CLB", &BuildOptions::default()).unwrap();
//! let clb = node.as_container().unwrap();
//! assert_eq!(clb.children[0].cell_type, "LUT4");
//! assert_eq!(clb.directs.len(), 5);
//! ```

pub mod attrs;
pub mod builder;
pub mod config;
pub mod error;
pub mod grouping;
pub mod interconnect;
pub mod metadata;
pub mod model;
pub mod modes;
pub mod naming;
pub mod netlist;
pub mod node;
pub mod timing;
pub mod topology;

pub use builder::{build_library, build_pb_type};
pub use error::{Error, Errors};
pub use model::derive_model;
pub use netlist::NetlistView;
pub use node::PbNode;
