//! The `rvopt` pass driver: reads a module, converts it to the RVSDG, runs
//! the selected optimizations in command-line order, lowers the result back
//! to the CFG IR, and emits it.

pub mod cli;
pub mod logger;
pub mod reader;
pub mod writer;
pub mod xml;

use anyhow::Context as _;
use clap::Parser;
use rvopt_conversion::{construct_with_timings, destruct};
use rvopt_ir::IrError;
use rvopt_session::{OutputFormat, Session, Statistics, StatisticsDescriptor, StatisticsId, Timer};
use rvopt_transform::{
    CommonNodeElimination, DeadNodeElimination, FunctionInlining, InvariantValueRedirection,
    LoopUnrolling, NodeReduction, Pass, PullIn, PushOut, SteensgaardBasic, ThetaGammaInversion,
};

use crate::cli::{PassSelector, Rvopt};

/// Map an error to the documented exit codes: 2 for irreducible control
/// flow, 1 for any other input failure.
pub fn exit_code(error: &anyhow::Error) -> u8 {
    match error.downcast_ref::<IrError>() {
        Some(IrError::IrreducibleCfg { .. }) => 2,
        _ => 1,
    }
}

pub fn run(args: &[String]) -> anyhow::Result<()> {
    let options = match Rvopt::try_parse_from(args) {
        Ok(options) => options,
        Err(error)
            if matches!(
                error.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            ) =>
        {
            let _ = error.print();
            return Ok(());
        }
        Err(error) => {
            let _ = error.print();
            anyhow::bail!("invalid command line");
        }
    };
    logger::install();

    let selectors = cli::pass_order(args);
    let mut session = Session::new(options.input.clone());
    session.output = options.output.clone();
    session.format = if options.xml {
        OutputFormat::Xml
    } else {
        OutputFormat::Llvm
    };
    session.statistics = StatisticsDescriptor::new(options.stats.clone(), options.statistics_ids());

    let text = std::fs::read_to_string(&session.input)
        .with_context(|| format!("cannot read '{}'", session.input.display()))?;
    let module = reader::parse_module(&text)?;

    let timer = Timer::start();
    let (mut rvsdg, timings) = construct_with_timings(&module)?;
    let construction = timer.elapsed();
    let mut record = Statistics::new(StatisticsId::Aggregation);
    record.add_timing("time", timings.aggregation);
    session.statistics.print(&record);
    let mut record = Statistics::new(StatisticsId::Annotation);
    record.add_timing("time", timings.annotation);
    session.statistics.print(&record);
    let mut record = Statistics::new(StatisticsId::RvsdgConstruction);
    record
        .add("nnodes", rvopt_transform::count_nodes(&rvsdg.graph))
        .add_timing("time", construction);
    session.statistics.print(&record);

    for selector in selectors {
        let mut pass: Box<dyn Pass> = match selector {
            PassSelector::Cne => Box::new(CommonNodeElimination),
            PassSelector::Dne => Box::new(DeadNodeElimination),
            PassSelector::Iln => Box::new(FunctionInlining),
            PassSelector::InvariantValueRedirection => Box::new(InvariantValueRedirection),
            PassSelector::Psh => Box::new(PushOut),
            PassSelector::Pll => Box::new(PullIn),
            PassSelector::Red => Box::new(NodeReduction),
            PassSelector::Ivt => Box::new(ThetaGammaInversion),
            PassSelector::Url => Box::new(LoopUnrolling::new(session.unroll_factor)),
            PassSelector::AASteensgaardBasic => Box::new(SteensgaardBasic),
        };
        log::info!(target: "driver", "running pass '{}'", pass.name());
        pass.run(&mut rvsdg, &session.statistics);
    }

    let output = match session.format {
        OutputFormat::Xml => xml::write_graph(&rvsdg),
        OutputFormat::Llvm => {
            let timer = Timer::start();
            let lowered = destruct(&rvsdg)?;
            let mut record = Statistics::new(StatisticsId::RvsdgDestruction);
            record.add_timing("time", timer.elapsed());
            session.statistics.print(&record);
            writer::write_module(&lowered)
        }
    };
    match &session.output {
        Some(path) => std::fs::write(path, output)
            .with_context(|| format!("cannot write '{}'", path.display()))?,
        None => print!("{output}"),
    }
    Ok(())
}
