use anyhow::Result;
use clap::Parser;
use std::collections::HashSet;

use graph::{CommitId, Graph, GraphSplicer};

#[derive(Parser)]
#[command(name = "demo_graph")]
#[command(about = "Render a synthetic commit graph with the lane engine", long_about = None)]
struct Cli {
    /// Number of branch-and-merge blocks in the synthetic history
    #[arg(short, long, default_value = "4")]
    blocks: usize,
    /// Reuse freed lanes anywhere instead of keeping the graph narrow
    #[arg(long)]
    gaps: bool,
    /// Also demonstrate an incremental refresh with a new tip
    #[arg(long)]
    refresh: bool,
}

/// A deterministic branchy history, top-down: each block merges a short
/// side branch back into the trunk.
fn synthetic_history(blocks: usize) -> Vec<(CommitId, Vec<CommitId>)> {
    let mut commits: Vec<(CommitId, Vec<CommitId>)> = Vec::new();
    for k in 0..blocks {
        let merge = format!("merge{k}");
        let trunk = format!("trunk{k}");
        let side = format!("side{k}");
        let join = format!("join{k}");
        commits.push((merge.into(), vec![trunk.clone().into(), side.clone().into()]));
        commits.push((trunk.into(), vec![join.clone().into()]));
        commits.push((side.into(), vec![join.clone().into()]));
        let parent = if k + 1 < blocks {
            vec![format!("merge{}", k + 1).into()]
        } else {
            vec![]
        };
        commits.push((join.into(), parent));
    }
    commits
}

fn render(graph: &mut Graph) -> Result<String> {
    let hidden = HashSet::new();
    let mut out = String::new();
    for row in 0..graph.row_count() {
        let frame = graph.frame(row)?;
        let (remap, width) = frame.flatten_lanes(graph.arcs(), &hidden);
        let mut cells = vec![' '; width.max(1)];
        for arc in frame.arcs_passing_by_commit(graph.arcs()) {
            if let Some(col) = remap[arc.lane].below {
                cells[col] = '|';
            }
        }
        if let Some(home) = frame.home_lane(graph.arcs()) {
            let col = remap
                .get(home)
                .and_then(|flat| flat.below.or(flat.above))
                .unwrap_or(0);
            cells[col] = '*';
        }
        let lanes: String = cells.into_iter().collect();
        out.push_str(&format!("{:<8} {}\n", lanes, frame.commit));
    }
    Ok(out)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let history = synthetic_history(cli.blocks);
    let mut graph = Graph::generate(history.clone(), cli.gaps);

    println!("Commit graph ({} rows):", graph.row_count());
    println!("────────────────────────");
    print!("{}", render(&mut graph)?);

    if cli.refresh {
        // A new tip appears above the old head; splice instead of
        // regenerating the whole graph.
        let old_heads: HashSet<CommitId> = ["merge0".into()].into_iter().collect();
        let new_heads: HashSet<CommitId> = ["tip".into()].into_iter().collect();
        let known: HashSet<CommitId> = history.iter().map(|(id, _)| id.clone()).collect();

        let mut new_sequence: Vec<(CommitId, Vec<CommitId>)> =
            vec![("tip".into(), vec!["merge0".into()])];
        new_sequence.extend(history);

        let mut splicer = GraphSplicer::new(graph, &old_heads, &new_heads);
        for (commit, parents) in &new_sequence {
            if splicer.found_equilibrium() {
                break;
            }
            splicer.splice_new_commit(commit.clone(), parents, known.contains(commit), cli.gaps);
        }
        let mut refreshed = splicer.finish()?;

        println!();
        println!("After refresh ({} rows):", refreshed.row_count());
        println!("────────────────────────");
        print!("{}", render(&mut refreshed)?);
    }

    Ok(())
}
