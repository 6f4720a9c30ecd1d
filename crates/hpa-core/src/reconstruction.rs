//! Context reconstructions and flow graphs: deferred attribution of metric
//! values sampled against an incomplete calling path.

use crate::context::ContextId;
use crate::error::Error;
use crate::id_tuple::ThreadId;

/// A deferred promise to attribute accumulated point values across a vector
/// of final contexts, using per-final interior weighting factors.
#[derive(Debug, Clone)]
pub struct ContextReconstruction {
    /// Identifier of the reconstruction group this belongs to.
    pub group: u32,
    /// The contexts the accumulated value will ultimately be attributed to.
    pub finals: Vec<ContextId>,
    /// Interior weighting factor per final context (same length as
    /// `finals`).
    pub interior_factors: Vec<f64>,
}

/// Computes rescaling factors over the thread's own accumulated data,
/// derived from already-observed activity per final context; in the
/// absence of prior activity the identity scale (`1.0`) is used for every
/// final.
#[must_use]
pub fn rescaling_factors(finals: &[ContextId], observed: impl Fn(ContextId) -> Option<f64>) -> Vec<f64> {
    finals
        .iter()
        .map(|&ctx| match observed(ctx) {
            Some(v) if v > 0.0 => v,
            _ => 1.0,
        })
        .collect()
}

/// Redistributes `value` across `recon.finals`, multiplying elementwise by
/// interior and rescaling factors.
///
/// # Errors
/// Returns [`Error::EmptyReconstruction`] if `recon.finals` is empty for a
/// nonzero `value` (nothing to redistribute to).
pub fn redistribute_reconstruction(
    recon: &ContextReconstruction,
    rescaling: &[f64],
    value: f64,
    thread: &ThreadId,
) -> Result<Vec<(ContextId, f64)>, Error> {
    if recon.finals.is_empty() {
        if value == 0.0 {
            return Ok(Vec::new());
        }
        return Err(Error::EmptyReconstruction {
            thread: thread.clone(),
        });
    }
    Ok(recon
        .finals
        .iter()
        .zip(recon.interior_factors.iter())
        .zip(rescaling.iter())
        .map(|((&ctx, &interior), &rescale)| (ctx, interior * rescale * value))
        .collect())
}

/// A flow graph redistributing a reconstruction group's summed values once
/// all of the group's reconstructions have been observed.
#[derive(Debug, Clone)]
pub struct ContextFlowGraph {
    /// The contexts this flow graph ultimately attributes values to.
    pub finals: Vec<ContextId>,
    /// Interior weighting factor per final context.
    pub interior_factors: Vec<f64>,
    /// One exterior-factor vector per containing reconstruction in the
    /// group.
    pub exterior_factors_by_reconstruction: Vec<Vec<f64>>,
}

/// Redistributes a flow graph's summed point value across its final
/// contexts, folding in exterior, interior, and rescaling factors.
///
/// If the owning reconstruction group has zero reconstructions, the
/// caller must not invoke this function for that group at all: per the
/// documented open question, a zero-reconstruction group's flow-graph
/// values are silently dropped rather than redistributed with a
/// fabricated exterior factor.
#[must_use]
pub fn redistribute_flow_graph(graph: &ContextFlowGraph, rescaling: &[f64], value: f64) -> Vec<(ContextId, f64)> {
    let mut out = Vec::new();
    for exterior in &graph.exterior_factors_by_reconstruction {
        for (((&ctx, &interior), &rescale), &ext) in graph
            .finals
            .iter()
            .zip(graph.interior_factors.iter())
            .zip(rescaling.iter())
            .zip(exterior.iter())
        {
            out.push((ctx, interior * rescale * ext * value));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_five_reconstruction_redistribution() {
        let recon = ContextReconstruction {
            group: 0,
            finals: vec![ContextId(1), ContextId(2)],
            interior_factors: vec![0.25, 0.75],
        };
        let thread = ThreadId::summary();
        let out = redistribute_reconstruction(&recon, &[1.0, 1.0], 8.0, &thread).unwrap();
        assert_eq!(out, vec![(ContextId(1), 2.0), (ContextId(2), 6.0)]);
    }

    #[test]
    fn empty_reconstruction_with_zero_value_is_not_an_error() {
        let recon = ContextReconstruction {
            group: 0,
            finals: vec![],
            interior_factors: vec![],
        };
        let thread = ThreadId::summary();
        let out = redistribute_reconstruction(&recon, &[], 0.0, &thread).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn empty_reconstruction_with_nonzero_value_is_an_error() {
        let recon = ContextReconstruction {
            group: 0,
            finals: vec![],
            interior_factors: vec![],
        };
        let thread = ThreadId::summary();
        let err = redistribute_reconstruction(&recon, &[], 8.0, &thread).unwrap_err();
        assert!(matches!(err, Error::EmptyReconstruction { .. }));
    }
}
