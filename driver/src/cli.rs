//! The `rvopt` command-line interface. Pass selectors may be given multiple
//! times; their order of appearance on the command line is the pass order.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use rvopt_session::StatisticsId;

#[derive(Debug, Parser)]
#[command(name = "rvopt")]
#[command(author, version, about = "An RVSDG-based optimizing middle-end", long_about = None)]
pub struct Rvopt {
    /// The input module to optimize
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Write output to <file> instead of stdout
    #[arg(short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write statistics to <file>
    #[arg(short = 's', value_name = "FILE")]
    pub stats: Option<PathBuf>,

    /// Output textual IR for the back-end [default]
    #[arg(long)]
    pub llvm: bool,

    /// Output the internal graph as XML
    #[arg(long, conflicts_with = "llvm")]
    pub xml: bool,

    /// Common node elimination
    #[arg(long, action = ArgAction::Count)]
    pub cne: u8,

    /// Dead node elimination
    #[arg(long, action = ArgAction::Count)]
    pub dne: u8,

    /// Function inlining
    #[arg(long, action = ArgAction::Count)]
    pub iln: u8,

    /// Invariant value redirection
    #[arg(long = "InvariantValueRedirection", action = ArgAction::Count)]
    pub invariant_value_redirection: u8,

    /// Node push out
    #[arg(long, action = ArgAction::Count)]
    pub psh: u8,

    /// Node pull in
    #[arg(long, action = ArgAction::Count)]
    pub pll: u8,

    /// Node reductions
    #[arg(long, action = ArgAction::Count)]
    pub red: u8,

    /// Theta-gamma inversion
    #[arg(long, action = ArgAction::Count)]
    pub ivt: u8,

    /// Loop unrolling
    #[arg(long, action = ArgAction::Count)]
    pub url: u8,

    /// Steensgaard alias analysis with basic memory state encoding
    #[arg(long = "AASteensgaardBasic", action = ArgAction::Count)]
    pub aa_steensgaard_basic: u8,

    /// Write aggregation statistics to file
    #[arg(long = "print-aggregation-time")]
    pub print_aggregation_time: bool,

    /// Write annotation statistics to file
    #[arg(long = "print-annotation-time")]
    pub print_annotation_time: bool,

    /// Write RVSDG construction statistics to file
    #[arg(long = "print-rvsdg-construction")]
    pub print_rvsdg_construction: bool,

    /// Write RVSDG destruction statistics to file
    #[arg(long = "print-rvsdg-destruction")]
    pub print_rvsdg_destruction: bool,

    /// Write common node elimination statistics to file
    #[arg(long = "print-cne-stat")]
    pub print_cne_stat: bool,

    /// Write dead node elimination statistics to file
    #[arg(long = "print-dne-stat")]
    pub print_dne_stat: bool,

    /// Write function inlining statistics to file
    #[arg(long = "print-iln-stat")]
    pub print_iln_stat: bool,

    /// Write invariant value redirection statistics to file
    #[arg(long = "printInvariantValueRedirection")]
    pub print_invariant_value_redirection: bool,

    /// Write node push statistics to file
    #[arg(long = "print-push-stat")]
    pub print_push_stat: bool,

    /// Write node pull statistics to file
    #[arg(long = "print-pull-stat")]
    pub print_pull_stat: bool,

    /// Write node reduction statistics to file
    #[arg(long = "print-reduction-stat")]
    pub print_reduction_stat: bool,

    /// Write theta-gamma inversion statistics to file
    #[arg(long = "print-ivt-stat")]
    pub print_ivt_stat: bool,

    /// Write loop unrolling statistics to file
    #[arg(long = "print-unroll-stat")]
    pub print_unroll_stat: bool,

    /// Write Steensgaard analysis statistics to file
    #[arg(long = "print-steensgaard-analysis")]
    pub print_steensgaard_analysis: bool,

    /// Write encoding statistics of the basic encoder to file
    #[arg(long = "print-basicencoder-encoding")]
    pub print_basicencoder_encoding: bool,
}

impl Rvopt {
    pub fn statistics_ids(&self) -> Vec<StatisticsId> {
        let mut ids = Vec::new();
        let selections = [
            (self.print_aggregation_time, StatisticsId::Aggregation),
            (self.print_annotation_time, StatisticsId::Annotation),
            (self.print_rvsdg_construction, StatisticsId::RvsdgConstruction),
            (self.print_rvsdg_destruction, StatisticsId::RvsdgDestruction),
            (self.print_cne_stat, StatisticsId::CommonNodeElimination),
            (self.print_dne_stat, StatisticsId::DeadNodeElimination),
            (self.print_iln_stat, StatisticsId::FunctionInlining),
            (
                self.print_invariant_value_redirection,
                StatisticsId::InvariantValueRedirection,
            ),
            (self.print_push_stat, StatisticsId::PushNodes),
            (self.print_pull_stat, StatisticsId::PullNodes),
            (self.print_reduction_stat, StatisticsId::ReduceNodes),
            (self.print_ivt_stat, StatisticsId::ThetaGammaInversion),
            (self.print_unroll_stat, StatisticsId::LoopUnrolling),
            (
                self.print_steensgaard_analysis,
                StatisticsId::SteensgaardAnalysis,
            ),
            (
                self.print_basicencoder_encoding,
                StatisticsId::BasicEncoderEncoding,
            ),
        ];
        for (selected, id) in selections {
            if selected {
                ids.push(id);
            }
        }
        ids
    }
}

/// The optimizations selectable on the command line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PassSelector {
    Cne,
    Dne,
    Iln,
    InvariantValueRedirection,
    Psh,
    Pll,
    Red,
    Ivt,
    Url,
    AASteensgaardBasic,
}

/// Recover the pass order from the raw arguments. Clap validates the flags;
/// this scan only preserves their relative order.
pub fn pass_order(args: &[String]) -> Vec<PassSelector> {
    args.iter()
        .filter_map(|arg| match arg.as_str() {
            "--cne" => Some(PassSelector::Cne),
            "--dne" => Some(PassSelector::Dne),
            "--iln" => Some(PassSelector::Iln),
            "--InvariantValueRedirection" => Some(PassSelector::InvariantValueRedirection),
            "--psh" => Some(PassSelector::Psh),
            "--pll" => Some(PassSelector::Pll),
            "--red" => Some(PassSelector::Red),
            "--ivt" => Some(PassSelector::Ivt),
            "--url" => Some(PassSelector::Url),
            "--AASteensgaardBasic" => Some(PassSelector::AASteensgaardBasic),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_order_follows_appearance() {
        let args: Vec<String> = ["rvopt", "--dne", "-o", "out", "--cne", "--dne", "in"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            pass_order(&args),
            vec![PassSelector::Dne, PassSelector::Cne, PassSelector::Dne]
        );
    }
}
