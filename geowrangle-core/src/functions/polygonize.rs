//! Rebuild simple faces from self-intersecting polygon rings.
//!
//! The rings are split into segments and noded at every crossing. The
//! resulting planar graph is walked face by face (a half-edge structure
//! where every face lies to the left of its edges). Bounded faces whose
//! interior is inside the original polygon under the even-odd rule are kept.

use std::collections::HashMap;

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::algorithm::InteriorPoint;
use geo::{Coord, Line, LineString, Polygon};

// Vertices closer than this (per axis) are merged into one graph node.
// Large coordinates widen it to `SNAP_RELATIVE` of the extent so the
// grid key stays far inside the i64 range.
const SNAP: f64 = 1e-10;
const SNAP_RELATIVE: f64 = 1e-13;
const MIN_FACE_AREA: f64 = 1e-14;

fn ring_segments(ring: &LineString<f64>) -> impl Iterator<Item = Line<f64>> + '_ {
    ring.lines().filter(|l| l.start != l.end)
}

fn polygon_segments(polygon: &Polygon<f64>) -> Vec<Line<f64>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .flat_map(ring_segments)
        .collect()
}

fn shares_endpoint(a: &Line<f64>, b: &Line<f64>) -> bool {
    a.start == b.start || a.start == b.end || a.end == b.start || a.end == b.end
}

fn is_endpoint(l: &Line<f64>, c: Coord<f64>) -> bool {
    c == l.start || c == l.end
}

/// True when two segments of the polygon's rings cross or overlap.
///
/// Segments of one ring may only meet at a vertex both share. Segments of
/// different rings may touch at a single point that is a vertex of either
/// one, like a hole whose corner rests on an edge of the shell.
pub fn has_self_intersection(polygon: &Polygon<f64>) -> bool {
    let segments: Vec<(usize, Line<f64>)> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .enumerate()
        .flat_map(|(ring, ls)| ring_segments(ls).map(move |l| (ring, l)))
        .collect();
    for (i, (ring_a, a)) in segments.iter().enumerate() {
        for (ring_b, b) in &segments[i + 1..] {
            match line_intersection(*a, *b) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return true,
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    let allowed = if ring_a == ring_b {
                        shares_endpoint(a, b) && is_endpoint(a, intersection) && is_endpoint(b, intersection)
                    } else {
                        is_endpoint(a, intersection) || is_endpoint(b, intersection)
                    };
                    if !allowed {
                        return true;
                    }
                }
            }
        }
    }
    false
}

struct VertexTable {
    snap: f64,
    coords: Vec<Coord<f64>>,
    lookup: HashMap<(i64, i64), usize>,
}

impl VertexTable {
    fn for_segments(segments: &[Line<f64>]) -> Self {
        let extent = segments
            .iter()
            .flat_map(|s| [s.start.x, s.start.y, s.end.x, s.end.y])
            .fold(0.0f64, |m, v| m.max(v.abs()));
        Self {
            snap: SNAP.max(extent * SNAP_RELATIVE),
            coords: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    fn key(&self, c: Coord<f64>) -> (i64, i64) {
        ((c.x / self.snap).round() as i64, (c.y / self.snap).round() as i64)
    }

    fn id(&mut self, c: Coord<f64>) -> usize {
        let key = self.key(c);
        *self.lookup.entry(key).or_insert_with(|| {
            self.coords.push(c);
            self.coords.len() - 1
        })
    }
}

/// Split every segment at every point where another segment touches it.
fn node_segments(segments: &[Line<f64>]) -> Vec<Vec<Coord<f64>>> {
    let mut splits: Vec<Vec<Coord<f64>>> = segments.iter().map(|s| vec![s.start, s.end]).collect();
    for i in 0..segments.len() {
        for j in i + 1..segments.len() {
            match line_intersection(segments[i], segments[j]) {
                None => {}
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    splits[i].push(intersection);
                    splits[j].push(intersection);
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    splits[i].extend([intersection.start, intersection.end]);
                    splits[j].extend([intersection.start, intersection.end]);
                }
            }
        }
    }
    for (segment, points) in segments.iter().zip(splits.iter_mut()) {
        let delta = segment.delta();
        let len2 = delta.x * delta.x + delta.y * delta.y;
        let param = |c: &Coord<f64>| ((c.x - segment.start.x) * delta.x + (c.y - segment.start.y) * delta.y) / len2;
        points.sort_by(|a, b| param(a).total_cmp(&param(b)));
    }
    splits
}

struct PlanarGraph {
    coords: Vec<Coord<f64>>,
    // half-edge h runs origin[h] -> origin[h ^ 1]
    origin: Vec<usize>,
    next: Vec<usize>,
    component: Vec<usize>,
}

fn find(parent: &mut [usize], mut x: usize) -> usize {
    while parent[x] != x {
        parent[x] = parent[parent[x]];
        x = parent[x];
    }
    x
}

impl PlanarGraph {
    fn build(segments: &[Line<f64>]) -> Self {
        let mut vertices = VertexTable::for_segments(segments);
        let mut edges: Vec<(usize, usize)> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for points in node_segments(segments) {
            let ids: Vec<usize> = points.into_iter().map(|c| vertices.id(c)).collect();
            for pair in ids.windows(2) {
                let (u, v) = (pair[0], pair[1]);
                if u != v && seen.insert((u.min(v), u.max(v))) {
                    edges.push((u, v));
                }
            }
        }

        let coords = vertices.coords;
        let mut origin = Vec::with_capacity(edges.len() * 2);
        let mut outgoing: Vec<Vec<usize>> = vec![Vec::new(); coords.len()];
        for &(u, v) in &edges {
            outgoing[u].push(origin.len());
            origin.push(u);
            outgoing[v].push(origin.len());
            origin.push(v);
        }
        let angle = |h: usize| {
            let a = coords[origin[h]];
            let b = coords[origin[h ^ 1]];
            (b.y - a.y).atan2(b.x - a.x)
        };
        for out in &mut outgoing {
            out.sort_by(|&a, &b| angle(a).total_cmp(&angle(b)));
        }

        // Arriving over u->v, leave v by the edge just clockwise of v->u:
        // the tightest left turn keeps the face on the left.
        let mut next = vec![0; origin.len()];
        for h in 0..origin.len() {
            let twin = h ^ 1;
            let v = origin[twin];
            let out = &outgoing[v];
            let pos = out.iter().position(|&e| e == twin).unwrap_or(0);
            next[h] = out[(pos + out.len() - 1) % out.len()];
        }

        let mut parent: Vec<usize> = (0..coords.len()).collect();
        for &(u, v) in &edges {
            let (ru, rv) = (find(&mut parent, u), find(&mut parent, v));
            if ru != rv {
                parent[ru] = rv;
            }
        }
        let component = (0..coords.len()).map(|v| find(&mut parent, v)).collect();

        Self {
            coords,
            origin,
            next,
            component,
        }
    }

    /// Every face cycle as (vertex ids, signed area).
    fn cycles(&self) -> Vec<(Vec<usize>, f64)> {
        let mut visited = vec![false; self.origin.len()];
        let mut cycles = Vec::new();
        for start in 0..self.origin.len() {
            if visited[start] {
                continue;
            }
            let mut ring = Vec::new();
            let mut h = start;
            while !visited[h] {
                visited[h] = true;
                ring.push(self.origin[h]);
                h = self.next[h];
            }
            let area = signed_area(ring.iter().map(|&v| self.coords[v]));
            cycles.push((ring, area));
        }
        cycles
    }

    fn ring(&self, ids: &[usize]) -> LineString<f64> {
        LineString::from(ids.iter().map(|&v| self.coords[v]).collect::<Vec<_>>())
    }
}

fn signed_area(coords: impl Iterator<Item = Coord<f64>>) -> f64 {
    let pts: Vec<Coord<f64>> = coords.collect();
    let n = pts.len();
    (0..n)
        .map(|i| {
            let (a, b) = (pts[i], pts[(i + 1) % n]);
            a.x * b.y - b.x * a.y
        })
        .sum::<f64>()
        / 2.0
}

fn ring_contains(ring: &LineString<f64>, p: Coord<f64>) -> bool {
    crossing_parity(ring.lines(), p)
}

/// Even-odd ray cast against an arbitrary bag of segments.
fn crossing_parity(segments: impl Iterator<Item = Line<f64>>, p: Coord<f64>) -> bool {
    let mut inside = false;
    for seg in segments {
        let (a, b) = (seg.start, seg.end);
        if (a.y > p.y) != (b.y > p.y) {
            let x = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x {
                inside = !inside;
            }
        }
    }
    inside
}

/// Decompose a polygon into the simple faces covering its even-odd interior.
///
/// A valid polygon comes back as a single face equal to itself up to vertex
/// order. Faces are returned largest first.
pub fn polygonize(polygon: &Polygon<f64>) -> Vec<Polygon<f64>> {
    let segments = polygon_segments(polygon);
    if segments.len() < 3 {
        return Vec::new();
    }
    let graph = PlanarGraph::build(&segments);
    let cycles = graph.cycles();

    let mut faces: Vec<(Polygon<f64>, f64, usize)> = Vec::new();
    // outermost cycle per connected component
    let mut outer: HashMap<usize, (usize, f64)> = HashMap::new();
    for (i, (ids, area)) in cycles.iter().enumerate() {
        let comp = graph.component[ids[0]];
        if *area > MIN_FACE_AREA {
            faces.push((Polygon::new(graph.ring(ids), Vec::new()), *area, comp));
        } else if *area < -MIN_FACE_AREA {
            let entry = outer.entry(comp).or_insert((i, *area));
            if *area < entry.1 {
                *entry = (i, *area);
            }
        }
    }

    // A component nested inside a face of another component is a hole of
    // the smallest such face.
    let mut holes: Vec<Vec<LineString<f64>>> = vec![Vec::new(); faces.len()];
    for (&comp, &(cycle, _)) in &outer {
        let corner = graph.coords[cycles[cycle].0[0]];
        let host = faces
            .iter()
            .enumerate()
            .filter(|(_, (face, _, c))| *c != comp && ring_contains(face.exterior(), corner))
            .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1))
            .map(|(i, _)| i);
        if let Some(host) = host {
            let mut ring: Vec<Coord<f64>> = cycles[cycle].0.iter().map(|&v| graph.coords[v]).collect();
            ring.reverse();
            holes[host].push(LineString::from(ring));
        }
    }

    let mut kept: Vec<(Polygon<f64>, f64)> = faces
        .into_iter()
        .zip(holes)
        .filter_map(|((face, area, _), interiors)| {
            let hole_area: f64 = interiors.iter().map(|r| signed_area(r.coords().copied()).abs()).sum();
            let face = Polygon::new(face.exterior().clone(), interiors);
            let inside = face.interior_point()?;
            crossing_parity(segments.iter().copied(), inside.0).then_some((face, area - hole_area))
        })
        .collect();
    kept.sort_by(|a, b| b.1.total_cmp(&a.1));
    kept.into_iter().map(|(face, _)| face).collect()
}
