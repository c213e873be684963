use criterion::{criterion_group, criterion_main, Criterion};
use partbuild::action::BuildAction;
use partbuild::buildgraph::{BuildGraph, BuildNode, CacheKey};
use partbuild::error::Result;
use partbuild::graph::{Graph, NodeId};
use partbuild::part::{LibType, Part, PartSpec};
use partbuild::progress::NoProgress;
use partbuild::sched::LeafScheduler;
use partbuild::weight::weigh_nodes;
use partbuild::work::Executor;

/// A root over `width` groups, each a chain of `depth` parts, with every
/// chain also depending on a shared base part.
fn wide_graph(width: usize, depth: usize) -> BuildGraph {
    let mut graph = Graph::new();
    let add = |graph: &mut Graph<BuildNode>, name: String| {
        let spec = PartSpec {
            name: name.clone(),
            context: "main".into(),
            repo: "main".into(),
            platform: "x64".into(),
            lib_type: LibType::Dynamic,
        };
        graph.add_node(name, BuildNode::new(Part::new(spec, "parts.toml")))
    };
    let root = add(&mut graph, "root".into());
    let base = add(&mut graph, "base".into());
    for w in 0..width {
        let mut parent = root;
        for d in 0..depth {
            let id = add(&mut graph, format!("p{}_{}", w, d));
            graph.add_edge(parent, id);
            parent = id;
        }
        graph.add_edge(parent, base);
    }
    BuildGraph {
        graph,
        root,
        key: CacheKey::default(),
        excluded: Default::default(),
    }
}

struct Nothing {
    threads: usize,
}

impl BuildAction for Nothing {
    fn do_build_action(&self, _graph: &BuildGraph, _id: NodeId) -> Result<String> {
        Ok(String::new())
    }

    fn num_threads(&self) -> usize {
        self.threads
    }
}

pub fn bench_weigh(c: &mut Criterion) {
    let mut graph = wide_graph(200, 10);
    c.bench_function("weigh 2000 parts", |b| b.iter(|| weigh_nodes(&mut graph)));
}

pub fn bench_schedule(c: &mut Criterion) {
    let mut graph = wide_graph(200, 10);
    weigh_nodes(&mut graph);
    for threads in [0, 4] {
        let action = Nothing { threads };
        c.bench_function(&format!("schedule 2000 parts, {} threads", threads), |b| {
            b.iter(|| {
                let mut sched = LeafScheduler::new(&graph);
                Executor::new(&graph, &action, &mut sched, &mut NoProgress)
                    .build()
                    .unwrap()
            })
        });
    }
}

criterion_group!(benches, bench_weigh, bench_schedule);
criterion_main!(benches);
