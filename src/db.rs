//! On-disk snapshot of an assembled BuildGraph.
//!
//! The file is a signature, a format version, then the cache key, the nodes
//! and their edges, all as little-endian length-prefixed records.  Anything
//! unexpected while reading is reported as InvalidData; callers treat that
//! as "no usable snapshot".

use crate::buildgraph::{BuildGraph, BuildNode, CacheKey, Weight, GRAPH_VERSION};
use crate::fs::MTime;
use crate::graph::{Graph, NodeId};
use crate::part::{LibChoice, LibType, Part, PartDescriptor, PartSpec};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

const SIGNATURE: &[u8] = b"partbuild-graph\n";

/// Upper bound on any single length field, to fail fast on garbage.
const MAX_LEN: u32 = 1 << 24;

/// Carried inside the InvalidData error for a snapshot written in another
/// format version.
#[derive(Debug, thiserror::Error)]
#[error("snapshot format version {0} is not current")]
pub struct VersionMismatch(pub u32);

fn invalid(msg: impl Into<String>) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, msg.into())
}

struct Writer<W: Write> {
    w: W,
}

impl<W: Write> Writer<W> {
    fn u8(&mut self, n: u8) -> std::io::Result<()> {
        self.w.write_all(&[n])
    }

    fn u32(&mut self, n: u32) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }

    fn u64(&mut self, n: u64) -> std::io::Result<()> {
        self.w.write_all(&n.to_le_bytes())
    }

    fn len(&mut self, n: usize) -> std::io::Result<()> {
        if n >= MAX_LEN as usize {
            return Err(invalid(format!("record too long: {}", n)));
        }
        self.u32(n as u32)
    }

    fn bool(&mut self, b: bool) -> std::io::Result<()> {
        self.u8(b as u8)
    }

    fn str(&mut self, s: &str) -> std::io::Result<()> {
        self.len(s.len())?;
        self.w.write_all(s.as_bytes())
    }

    fn opt_str(&mut self, s: &Option<String>) -> std::io::Result<()> {
        match s {
            None => self.bool(false),
            Some(s) => {
                self.bool(true)?;
                self.str(s)
            }
        }
    }

    fn strs(&mut self, list: &[String]) -> std::io::Result<()> {
        self.len(list.len())?;
        for s in list {
            self.str(s)?;
        }
        Ok(())
    }

    fn path(&mut self, path: &Path) -> std::io::Result<()> {
        let s = path
            .to_str()
            .ok_or_else(|| invalid(format!("non-utf8 path {:?}", path)))?;
        self.str(s)
    }

    fn mtime(&mut self, mtime: MTime) -> std::io::Result<()> {
        self.u64(match mtime {
            MTime::Missing => 0,
            MTime::Stamp(t) => t,
        })
    }

    fn files(&mut self, files: &BTreeMap<PathBuf, MTime>) -> std::io::Result<()> {
        self.len(files.len())?;
        for (path, &mtime) in files {
            self.path(path)?;
            self.mtime(mtime)?;
        }
        Ok(())
    }

    fn map(&mut self, map: &BTreeMap<String, String>) -> std::io::Result<()> {
        self.len(map.len())?;
        for (k, v) in map {
            self.str(k)?;
            self.str(v)?;
        }
        Ok(())
    }

    fn lib_type(&mut self, lib_type: LibType) -> std::io::Result<()> {
        self.u8(match lib_type {
            LibType::Dynamic => 0,
            LibType::Static => 1,
        })
    }

    fn key(&mut self, key: &CacheKey) -> std::io::Result<()> {
        self.str(&key.tool_version)?;
        self.mtime(key.created)?;
        self.files(&key.files)?;
        self.files(&key.strategy_files)?;
        self.str(&key.fingerprint)?;
        self.path(&key.source_root)?;
        self.path(&key.output_root)?;
        self.str(&key.host)?;
        self.map(&key.env)
    }

    fn part(&mut self, part: &Part) -> std::io::Result<()> {
        let spec = &part.spec;
        self.str(&spec.name)?;
        self.str(&spec.context)?;
        self.str(&spec.repo)?;
        self.str(&spec.platform)?;
        self.lib_type(spec.lib_type)?;
        self.path(&part.source)?;

        self.len(part.sub_parts.len())?;
        for desc in &part.sub_parts {
            self.str(&desc.name)?;
            self.opt_str(&desc.context)?;
            self.opt_str(&desc.repo)?;
            self.opt_str(&desc.platform)?;
            self.u8(match desc.lib_type {
                LibChoice::Parent => 0,
                LibChoice::Static => 1,
                LibChoice::Dynamic => 2,
            })?;
        }

        self.bool(part.sequential)?;
        self.bool(part.early)?;
        self.strs(&part.aspects)?;
        self.strs(&part.requires_aspects)?;
        self.strs(&part.exclude_platforms)?;
        self.len(part.exclude_lib_types.len())?;
        for &lib_type in &part.exclude_lib_types {
            self.lib_type(lib_type)?;
        }
        self.opt_str(&part.command)?;
        self.opt_str(&part.clean)
    }

    fn graph(&mut self, bg: &BuildGraph) -> std::io::Result<()> {
        self.w.write_all(SIGNATURE)?;
        self.u32(bg.key.version)?;
        self.key(&bg.key)?;

        // Node ids may have holes after deletions; renumber densely.
        let ids: Vec<NodeId> = bg.graph.all_nodes().collect();
        let index: HashMap<NodeId, u32> = ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i as u32))
            .collect();

        self.len(ids.len())?;
        for &id in &ids {
            let node = bg.node(id);
            self.str(bg.key(id))?;
            self.part(&node.part)?;
            self.u32(node.weight.phase)?;
            self.u64(node.weight.cumulative)?;
        }
        for &id in &ids {
            let children = bg.graph.children(id);
            self.len(children.len())?;
            for child in children {
                self.u32(index[child])?;
            }
        }
        self.u32(index[&bg.root])?;
        self.map(&bg.excluded)
    }
}

struct Reader<R: Read> {
    r: R,
}

impl<R: Read> Reader<R> {
    fn bytes<const N: usize>(&mut self) -> std::io::Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.r.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn u8(&mut self) -> std::io::Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u32(&mut self) -> std::io::Result<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn u64(&mut self) -> std::io::Result<u64> {
        Ok(u64::from_le_bytes(self.bytes()?))
    }

    fn len(&mut self) -> std::io::Result<usize> {
        let n = self.u32()?;
        if n >= MAX_LEN {
            return Err(invalid(format!("bad length {}", n)));
        }
        Ok(n as usize)
    }

    fn bool(&mut self) -> std::io::Result<bool> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            n => Err(invalid(format!("bad bool {}", n))),
        }
    }

    fn str(&mut self) -> std::io::Result<String> {
        let len = self.len()?;
        let mut buf = vec![0u8; len];
        self.r.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| invalid("bad utf8"))
    }

    fn opt_str(&mut self) -> std::io::Result<Option<String>> {
        Ok(if self.bool()? { Some(self.str()?) } else { None })
    }

    fn strs(&mut self) -> std::io::Result<Vec<String>> {
        let len = self.len()?;
        (0..len).map(|_| self.str()).collect()
    }

    fn path(&mut self) -> std::io::Result<PathBuf> {
        Ok(PathBuf::from(self.str()?))
    }

    fn mtime(&mut self) -> std::io::Result<MTime> {
        Ok(match self.u64()? {
            0 => MTime::Missing,
            t => MTime::Stamp(t),
        })
    }

    fn files(&mut self) -> std::io::Result<BTreeMap<PathBuf, MTime>> {
        let len = self.len()?;
        let mut files = BTreeMap::new();
        for _ in 0..len {
            let path = self.path()?;
            files.insert(path, self.mtime()?);
        }
        Ok(files)
    }

    fn map(&mut self) -> std::io::Result<BTreeMap<String, String>> {
        let len = self.len()?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let k = self.str()?;
            map.insert(k, self.str()?);
        }
        Ok(map)
    }

    fn lib_type(&mut self) -> std::io::Result<LibType> {
        match self.u8()? {
            0 => Ok(LibType::Dynamic),
            1 => Ok(LibType::Static),
            n => Err(invalid(format!("bad lib type {}", n))),
        }
    }

    fn key(&mut self, version: u32) -> std::io::Result<CacheKey> {
        Ok(CacheKey {
            version,
            tool_version: self.str()?,
            created: self.mtime()?,
            files: self.files()?,
            strategy_files: self.files()?,
            fingerprint: self.str()?,
            source_root: self.path()?,
            output_root: self.path()?,
            host: self.str()?,
            env: self.map()?,
        })
    }

    fn part(&mut self) -> std::io::Result<Part> {
        let spec = PartSpec {
            name: self.str()?,
            context: self.str()?,
            repo: self.str()?,
            platform: self.str()?,
            lib_type: self.lib_type()?,
        };
        let mut part = Part::new(spec, self.path()?);

        let subs = self.len()?;
        for _ in 0..subs {
            let mut desc = PartDescriptor::named(self.str()?);
            desc.context = self.opt_str()?;
            desc.repo = self.opt_str()?;
            desc.platform = self.opt_str()?;
            desc.lib_type = match self.u8()? {
                0 => LibChoice::Parent,
                1 => LibChoice::Static,
                2 => LibChoice::Dynamic,
                n => return Err(invalid(format!("bad lib choice {}", n))),
            };
            part.sub_parts.push(desc);
        }

        part.sequential = self.bool()?;
        part.early = self.bool()?;
        part.aspects = self.strs()?;
        part.requires_aspects = self.strs()?;
        part.exclude_platforms = self.strs()?;
        let excluded = self.len()?;
        for _ in 0..excluded {
            let lib_type = self.lib_type()?;
            part.exclude_lib_types.push(lib_type);
        }
        part.command = self.opt_str()?;
        part.clean = self.opt_str()?;
        Ok(part)
    }

    fn graph(&mut self) -> std::io::Result<BuildGraph> {
        let sig: [u8; SIGNATURE.len()] = self.bytes()?;
        if sig != SIGNATURE {
            return Err(invalid("not a graph snapshot"));
        }
        let version = self.u32()?;
        if version != GRAPH_VERSION {
            return Err(std::io::Error::new(
                ErrorKind::InvalidData,
                VersionMismatch(version),
            ));
        }
        let key = self.key(version)?;

        let mut graph = Graph::new();
        let count = self.len()?;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let node_key = self.str()?;
            let part = self.part()?;
            let weight = Weight {
                phase: self.u32()?,
                cumulative: self.u64()?,
            };
            if graph.lookup(&node_key).is_some() {
                return Err(invalid(format!("duplicate node {}", node_key)));
            }
            ids.push(graph.add_node(node_key, BuildNode { part, weight }));
        }
        let node = |n: u32| -> std::io::Result<NodeId> {
            ids.get(n as usize)
                .copied()
                .ok_or_else(|| invalid(format!("bad node index {}", n)))
        };
        for &parent in &ids {
            let children = self.len()?;
            for _ in 0..children {
                let child = node(self.u32()?)?;
                graph.add_edge(parent, child);
            }
        }
        let root = node(self.u32()?)?;
        let excluded = self.map()?;

        let mut rest = [0u8; 1];
        if self.r.read(&mut rest)? != 0 {
            return Err(invalid("trailing data"));
        }
        Ok(BuildGraph {
            graph,
            root,
            key,
            excluded,
        })
    }
}

/// Persist a graph, replacing any previous snapshot at `path`.
pub fn write(path: &Path, graph: &BuildGraph) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    // Write to a sibling and rename so a crash never leaves half a snapshot.
    let tmp = path.with_extension("tmp");
    {
        let mut w = Writer {
            w: BufWriter::new(File::create(&tmp)?),
        };
        w.graph(graph)?;
        w.w.flush()?;
    }
    std::fs::rename(&tmp, path)
}

/// Load a previously written graph.
pub fn read(path: &Path) -> std::io::Result<BuildGraph> {
    let mut r = Reader {
        r: BufReader::new(File::open(path)?),
    };
    r.graph().map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => invalid("truncated snapshot"),
        _ => err,
    })
}
