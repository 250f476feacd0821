use super::time::{TimeParts, TimeZonePolicy, decompose};
use crate::schema::start_time_type;
use datafusion::arrow::array::{Array, ArrayRef, Int32Array, Int64Array, TimestampMillisecondArray};
use datafusion::arrow::datatypes::DataType;
use datafusion::common::DataFusionError;
use datafusion::error::Result as DFResult;
use datafusion::execution::context::SessionContext;
use datafusion::logical_expr::{ColumnarValue, ScalarUDF, Volatility, create_udf};
use datafusion::prelude::Expr;
use std::sync::Arc;

type PartFn = fn(&TimeParts) -> i32;

/// Scalar functions deriving calendar columns from an epoch-millisecond `ts`,
/// all bound to one timezone policy.
#[derive(Debug, Clone)]
pub struct TimeFunctions {
    start_time: Arc<ScalarUDF>,
    hour: Arc<ScalarUDF>,
    day: Arc<ScalarUDF>,
    week: Arc<ScalarUDF>,
    month: Arc<ScalarUDF>,
    year: Arc<ScalarUDF>,
    weekday: Arc<ScalarUDF>,
}

impl TimeFunctions {
    pub fn new(policy: TimeZonePolicy) -> Self {
        Self {
            start_time: Arc::new(start_time_udf(policy)),
            hour: Arc::new(part_udf("songplay_hour", policy, |p| p.hour)),
            day: Arc::new(part_udf("songplay_day", policy, |p| p.day)),
            week: Arc::new(part_udf("songplay_week", policy, |p| p.week)),
            month: Arc::new(part_udf("songplay_month", policy, |p| p.month)),
            year: Arc::new(part_udf("songplay_year", policy, |p| p.year)),
            weekday: Arc::new(part_udf("songplay_weekday", policy, |p| p.weekday)),
        }
    }

    /// Makes the functions callable from SQL on `ctx`.
    pub fn register(&self, ctx: &SessionContext) {
        for udf in [
            &self.start_time,
            &self.hour,
            &self.day,
            &self.week,
            &self.month,
            &self.year,
            &self.weekday,
        ] {
            ctx.register_udf(udf.as_ref().clone());
        }
    }

    pub fn start_time(&self, ts: Expr) -> Expr {
        self.start_time.call(vec![ts])
    }

    pub fn hour(&self, ts: Expr) -> Expr {
        self.hour.call(vec![ts])
    }

    pub fn day(&self, ts: Expr) -> Expr {
        self.day.call(vec![ts])
    }

    pub fn week(&self, ts: Expr) -> Expr {
        self.week.call(vec![ts])
    }

    pub fn month(&self, ts: Expr) -> Expr {
        self.month.call(vec![ts])
    }

    pub fn year(&self, ts: Expr) -> Expr {
        self.year.call(vec![ts])
    }

    pub fn weekday(&self, ts: Expr) -> Expr {
        self.weekday.call(vec![ts])
    }
}

fn start_time_udf(policy: TimeZonePolicy) -> ScalarUDF {
    create_udf(
        "songplay_start_time",
        vec![DataType::Int64],
        start_time_type(),
        Volatility::Immutable,
        Arc::new(move |args: &[ColumnarValue]| convert_to_start_time(args, policy)),
    )
}

fn part_udf(name: &str, policy: TimeZonePolicy, part: PartFn) -> ScalarUDF {
    create_udf(
        name,
        vec![DataType::Int64],
        DataType::Int32,
        Volatility::Immutable,
        Arc::new(move |args: &[ColumnarValue]| extract_time_part(args, policy, part)),
    )
}

fn epoch_millis_arg(args: &[ColumnarValue]) -> DFResult<ArrayRef> {
    let mut arrays = ColumnarValue::values_to_arrays(args)?;
    if arrays.len() != 1 {
        return Err(DataFusionError::Internal(format!(
            "Expected one timestamp argument, got {}",
            arrays.len()
        )));
    }
    Ok(arrays.remove(0))
}

/// Converts epoch milliseconds to the wall-clock start time
fn convert_to_start_time(args: &[ColumnarValue], policy: TimeZonePolicy) -> DFResult<ColumnarValue> {
    let array = epoch_millis_arg(args)?;
    let ts_array = array
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| DataFusionError::Internal("Expected int64 array".to_string()))?;

    let result: TimestampMillisecondArray = ts_array
        .iter()
        .map(|opt_ts| opt_ts.and_then(|ts| decompose(ts, policy)).map(|p| p.start_time_millis()))
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}

fn extract_time_part(
    args: &[ColumnarValue],
    policy: TimeZonePolicy,
    part: PartFn,
) -> DFResult<ColumnarValue> {
    let array = epoch_millis_arg(args)?;
    let ts_array = array
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| DataFusionError::Internal("Expected int64 array".to_string()))?;

    let result: Int32Array = ts_array
        .iter()
        .map(|opt_ts| opt_ts.and_then(|ts| decompose(ts, policy)).map(|p| part(&p)))
        .collect();

    Ok(ColumnarValue::Array(Arc::new(result)))
}
