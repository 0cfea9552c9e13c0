//! Overload resolver
//!
//! Matches one candidate's declared parameters, left to right, against the
//! stack positions `first..=last`. Matching only plans the conversions;
//! nothing is converted (and no script value pinned) until the chosen
//! candidate is materialized.
//!
//! Candidates are tried in declaration order and the first full match wins.
//! There is no ranking by specificity.

use std::sync::Arc;

use tether_script::{ScriptState, ScriptType};
use tether_sdk::{HostArray, HostValue, MethodInfo, ParamMode, TypeRef};

use crate::coercion::{check_and_extract, extract, Extractor};
use crate::error::FaultResult;
use crate::logging;
use crate::translator::Translator;

/// Where a variadic array comes from
enum ParamsSource {
    /// No trailing arguments
    Empty,
    /// One aggregate value converted as a whole
    Aggregate(i32, Extractor),
    /// Each trailing argument converted to the element type
    Elements(Vec<(i32, Extractor)>),
}

/// How one parameter gets its value
enum ArgPlan {
    Extract(i32, Extractor),
    Default(HostValue),
    Out,
    Params(TypeRef, ParamsSource),
}

/// A matched candidate and its conversion plan
pub struct MethodArgs {
    /// The candidate
    pub method: Arc<MethodInfo>,
    plan: Vec<ArgPlan>,
    /// Parameters written back after the call (ref and out), in order
    pub out_indices: Vec<usize>,
}

impl MethodArgs {
    /// Run the planned conversions
    pub fn materialize(
        &self,
        tr: &Translator,
        state: &mut ScriptState,
    ) -> FaultResult<Vec<HostValue>> {
        let mut args = Vec::with_capacity(self.plan.len());
        for step in &self.plan {
            let value = match step {
                ArgPlan::Extract(idx, ex) => extract(tr, state, *idx, ex)?,
                ArgPlan::Default(v) => v.clone(),
                ArgPlan::Out => HostValue::Null,
                ArgPlan::Params(element, ParamsSource::Empty) => {
                    HostValue::Array(HostArray::new(element, Vec::new()))
                }
                ArgPlan::Params(_, ParamsSource::Aggregate(idx, ex)) => {
                    extract(tr, state, *idx, ex)?
                }
                ArgPlan::Params(element, ParamsSource::Elements(items)) => {
                    let mut values = Vec::with_capacity(items.len());
                    for (idx, ex) in items {
                        values.push(extract(tr, state, *idx, ex)?);
                    }
                    HostValue::Array(HostArray::new(element, values))
                }
            };
            args.push(value);
        }
        Ok(args)
    }
}

fn reject(method: &MethodInfo, param: usize) -> Option<MethodArgs> {
    logging::log_candidate_rejected(&method.name, param);
    None
}

fn is_aggregate(state: &ScriptState, tr: &Translator, idx: i32) -> bool {
    match state.type_at(idx) {
        ScriptType::Table => true,
        ScriptType::UserData => matches!(tr.object_at(state, idx), Ok(Some(HostValue::Array(_)))),
        _ => false,
    }
}

/// Match `method` against the arguments at `first..=last`
pub fn match_method(
    tr: &Translator,
    state: &mut ScriptState,
    method: &Arc<MethodInfo>,
    first: i32,
    last: i32,
) -> Option<MethodArgs> {
    let mut plan = Vec::with_capacity(method.params.len());
    let mut out_indices = Vec::new();
    let mut pos = first;

    for (i, param) in method.params.iter().enumerate() {
        if param.mode == ParamMode::Out {
            plan.push(ArgPlan::Out);
            out_indices.push(i);
            continue;
        }

        if let Some(element) = param.element_type() {
            let element = element.clone();
            if pos > last {
                plan.push(ArgPlan::Params(element, ParamsSource::Empty));
                continue;
            }
            if pos == last && is_aggregate(state, tr, pos) {
                if let Some(ex) = check_and_extract(tr, state, pos, &param.ty) {
                    plan.push(ArgPlan::Params(element, ParamsSource::Aggregate(pos, ex)));
                    pos += 1;
                    continue;
                }
            }
            let mut items = Vec::new();
            while pos <= last {
                match check_and_extract(tr, state, pos, &element) {
                    Some(ex) => items.push((pos, ex)),
                    None => return reject(method, i),
                }
                pos += 1;
            }
            plan.push(ArgPlan::Params(element, ParamsSource::Elements(items)));
            continue;
        }

        if pos > last {
            match &param.default {
                Some(d) => {
                    plan.push(ArgPlan::Default(d.clone()));
                    continue;
                }
                None => return reject(method, i),
            }
        }

        match check_and_extract(tr, state, pos, &param.ty) {
            Some(ex) => {
                plan.push(ArgPlan::Extract(pos, ex));
                if param.mode == ParamMode::Ref {
                    out_indices.push(i);
                }
                pos += 1;
            }
            None => match &param.default {
                Some(d) => plan.push(ArgPlan::Default(d.clone())),
                None => return reject(method, i),
            },
        }
    }

    if pos != last + 1 {
        return reject(method, method.params.len());
    }
    Some(MethodArgs {
        method: method.clone(),
        plan,
        out_indices,
    })
}

/// First candidate, in declaration order, that accepts the arguments
pub fn resolve(
    tr: &Translator,
    state: &mut ScriptState,
    candidates: &[Arc<MethodInfo>],
    first: i32,
    last: i32,
) -> Option<MethodArgs> {
    candidates
        .iter()
        .find_map(|m| match_method(tr, state, m, first, last))
}
