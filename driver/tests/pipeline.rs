//! Text-to-text pipeline tests: parse the wire format, run the middle-end,
//! emit, and re-parse.

use pretty_assertions::assert_eq;

use rvopt_conversion::{construct, destruct};
use rvopt_driver::{reader::parse_module, writer::write_module};
use rvopt_ir::Linkage;
use rvopt_session::StatisticsDescriptor;
use rvopt_transform::{CommonNodeElimination, DeadNodeElimination, NodeReduction, Pass};

const SUM_MODULE: &str = "\
module sum
function @sum(n : i32) -> (i32) external {
block 0:
  s : i32 = const.i32 0
  i : i32 = const.i32 0
  jump 1
block 1:
  s2 : i32 = add.i32 s, i
  one : i32 = const.i32 1
  i2 : i32 = add.i32 i, one
  s : i32 = copy.i32 s2
  i : i32 = copy.i32 i2
  c : i1 = slt.i32 i, n
  q : ctl<2> = match c, 1:1, default:0
  branch q, 2, 1
block 2:
  return s
}
";

#[test]
fn the_wire_format_survives_the_middle_end() {
    let module = parse_module(SUM_MODULE).unwrap();
    let rvsdg = construct(&module).unwrap();
    let lowered = destruct(&rvsdg).unwrap();
    let text = write_module(&lowered);
    // The emitted module must itself be a valid input.
    let reparsed = parse_module(&text).unwrap();
    assert_eq!(reparsed.functions.len(), 1);
    assert_eq!(reparsed.functions[0].name, "sum");
    assert_eq!(reparsed.functions[0].linkage, Linkage::External);
}

#[test]
fn passes_run_over_parsed_modules() {
    let module = parse_module(SUM_MODULE).unwrap();
    let mut rvsdg = construct(&module).unwrap();
    let statistics = StatisticsDescriptor::default();
    NodeReduction.run(&mut rvsdg, &statistics);
    CommonNodeElimination.run(&mut rvsdg, &statistics);
    DeadNodeElimination.run(&mut rvsdg, &statistics);
    let lowered = destruct(&rvsdg).unwrap();
    assert_eq!(lowered.functions.len(), 1);
}

#[test]
fn data_definitions_round_trip() {
    let text = "\
module globals
import @x : i32 external
data @d1 : i32 external constant {
  v : i32 = testop @x
  return v
}
data @d2 : i32 internal {
  v : i32 = testop
  return v
}
";
    let module = parse_module(text).unwrap();
    let rvsdg = construct(&module).unwrap();
    assert_eq!(rvsdg.graph.region(rvsdg.graph.root()).nodes.len(), 2);
    let lowered = destruct(&rvsdg).unwrap();
    let emitted = write_module(&lowered);
    let reparsed = parse_module(&emitted).unwrap();
    assert_eq!(reparsed.data.len(), 2);
    assert!(reparsed.data[0].constant);
    assert!(!reparsed.data[1].constant);
}
