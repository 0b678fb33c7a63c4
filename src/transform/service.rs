//! Turns a prediction into the raw and grid response variants.

use crate::common::error::{FlowError, FlowResult};
use crate::data::domain::{
    Dataset, Field, FieldMap, COORDS, DIVERGENCE, MOMENTUM, PRESSURE, VELOCITY,
};
use crate::inference::domain::PredictionResult;

use super::domain::{
    PredictionResponse, Response2d, ValueMap, DIV, MOMENTUM_MAG, MOMENTUM_X, MOMENTUM_Y, P, UX,
    UY, U_MAG,
};
use super::interp::{regular_grid, Interpolator};

/// Physical-unit fields, ready for presentation.
struct Physical {
    coords: Vec<[f64; 2]>,
    internal_coords: Vec<[f64; 2]>,
    target: ValueMap,
    predicted: ValueMap,
    error: ValueMap,
    residuals: ValueMap,
    porous_ids: Vec<f64>,
}

fn field_with(
    map: &FieldMap,
    group: &str,
    name: &str,
    dim: usize,
    len: usize,
) -> FlowResult<Field> {
    let field = map
        .get(name)
        .ok_or_else(|| FlowError::transform(format!("{group} has no field {name}")))?;
    if field.dim != dim || field.len() != len {
        return Err(FlowError::transform(format!(
            "{group}.{name} has shape {}x{}, expected {len}x{dim}",
            field.len(),
            field.dim
        )));
    }
    Ok(field.clone())
}

fn rows(field: &Field) -> FlowResult<Vec<[f64; 2]>> {
    if field.dim != 2 {
        return Err(FlowError::transform("coordinates must have two components"));
    }
    let out: Vec<[f64; 2]> = field
        .values
        .chunks_exact(2)
        .map(|c| [c[0], c[1]])
        .collect();
    if out.iter().flatten().any(|v| !v.is_finite()) {
        return Err(FlowError::transform("coordinates must be finite"));
    }
    Ok(out)
}

fn flow_group(u: &Field, p: &Field) -> ValueMap {
    let mut group = ValueMap::new();
    group.insert(UX.into(), u.component(0));
    group.insert(UY.into(), u.component(1));
    group.insert(U_MAG.into(), u.row_norms());
    group.insert(P.into(), p.values.clone());
    group
}

fn abs_diff(a: &Field, b: &Field) -> Field {
    Field {
        dim: a.dim,
        values: a
            .values
            .iter()
            .zip(&b.values)
            .map(|(x, y)| (x - y).abs())
            .collect(),
    }
}

fn to_physical(dataset: &Dataset, result: &PredictionResult) -> FlowResult<Physical> {
    let n = dataset.sample_len();
    let m = dataset.internal_len();

    let coords = dataset.denormalize(COORDS, dataset.sample_field(COORDS)?)?;
    let tgt_u = dataset.denormalize(VELOCITY, dataset.sample_field(VELOCITY)?)?;
    let tgt_p = dataset.denormalize(PRESSURE, dataset.sample_field(PRESSURE)?)?;
    let internal = dataset.denormalize(COORDS, dataset.internal_field(COORDS)?)?;

    let pred_u = dataset.denormalize(
        VELOCITY,
        &field_with(&result.predicted, "predicted", VELOCITY, 2, n)?,
    )?;
    let pred_p = dataset.denormalize(
        PRESSURE,
        &field_with(&result.predicted, "predicted", PRESSURE, 1, n)?,
    )?;
    let momentum = dataset.denormalize_or_keep(
        MOMENTUM,
        &field_with(&result.residuals, "residuals", MOMENTUM, 2, m)?,
    )?;
    let div = dataset.denormalize_or_keep(
        DIVERGENCE,
        &field_with(&result.residuals, "residuals", DIVERGENCE, 1, m)?,
    )?;

    let err_u = abs_diff(&pred_u, &tgt_u);
    let err_p = abs_diff(&pred_p, &tgt_p);

    let mut residuals = ValueMap::new();
    residuals.insert(MOMENTUM_X.into(), momentum.component(0));
    residuals.insert(MOMENTUM_Y.into(), momentum.component(1));
    residuals.insert(MOMENTUM_MAG.into(), momentum.row_norms());
    residuals.insert(DIV.into(), div.values);

    let porous_ids = dataset.porous_mask()?;
    if porous_ids.len() != n {
        return Err(FlowError::transform(format!(
            "porous mask has {} entries for {n} points",
            porous_ids.len()
        )));
    }

    Ok(Physical {
        coords: rows(&coords)?,
        internal_coords: rows(&internal)?,
        target: flow_group(&tgt_u, &tgt_p),
        predicted: flow_group(&pred_u, &pred_p),
        error: flow_group(&err_u, &err_p),
        residuals,
        porous_ids,
    })
}

fn points_map(points: &[[f64; 2]]) -> ValueMap {
    let mut map = ValueMap::new();
    map.insert("x".into(), points.iter().map(|p| p[0]).collect());
    map.insert("y".into(), points.iter().map(|p| p[1]).collect());
    map
}

fn resample(interp: &Interpolator, group: &ValueMap) -> FlowResult<ValueMap> {
    group
        .iter()
        .map(|(name, values)| Ok((name.clone(), interp.interpolate(values)?)))
        .collect()
}

/// Build both response variants from one dataset and its prediction.
pub fn build_response(
    dataset: &Dataset,
    result: &PredictionResult,
    grid_res: usize,
) -> FlowResult<PredictionResponse> {
    let physical = to_physical(dataset, result)?;

    let grid = regular_grid(&physical.coords, grid_res)?;
    let on_samples = Interpolator::new(&physical.coords, &grid)?;
    let on_internal = Interpolator::new(&physical.internal_coords, &grid)?;

    let grid_data = Response2d {
        points: points_map(&grid),
        target: resample(&on_samples, &physical.target)?,
        predicted: resample(&on_samples, &physical.predicted)?,
        error: resample(&on_samples, &physical.error)?,
        residuals: resample(&on_internal, &physical.residuals)?,
        porous_ids: None,
    };
    let raw_data = Response2d {
        points: points_map(&physical.coords),
        target: physical.target,
        predicted: physical.predicted,
        error: physical.error,
        residuals: physical.residuals,
        porous_ids: Some(physical.porous_ids),
    };
    Ok(PredictionResponse {
        raw_data,
        grid_data,
    })
}
