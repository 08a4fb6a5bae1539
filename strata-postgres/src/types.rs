//! Conversions between driver values and PostgreSQL wire types.

use chrono::{DateTime, Utc};
use strata_migrate::driver::{SqlRow, SqlValue};
use tokio_postgres::Row;
use tokio_postgres::types::{Kind, ToSql, Type};
use uuid::Uuid;

use crate::error::{PgError, PgResult};

/// Resolve domains (e.g. information_schema's `sql_identifier`) down to
/// their base type.
fn base_type(ty: &Type) -> &Type {
    match ty.kind() {
        Kind::Domain(inner) => base_type(inner),
        _ => ty,
    }
}

/// Bind driver values against the parameter types of a prepared
/// statement, coercing integers and UUID text to the width the server
/// inferred.
pub(crate) fn bind_params(
    types: &[Type],
    values: &[SqlValue],
) -> PgResult<Vec<Box<dyn ToSql + Sync + Send>>> {
    if types.len() != values.len() {
        return Err(PgError::type_conversion(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            values.len()
        )));
    }

    values
        .iter()
        .zip(types)
        .map(|(value, ty)| bind_param(value, base_type(ty)))
        .collect()
}

fn bind_param(value: &SqlValue, ty: &Type) -> PgResult<Box<dyn ToSql + Sync>> {
    let param: Box<dyn ToSql + Sync> = match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Boolean(b) => Box::new(*b),
        SqlValue::Integer(i) => {
            if *ty == Type::INT2 {
                Box::new(*i as i16)
            } else if *ty == Type::INT4 {
                Box::new(*i as i32)
            } else {
                Box::new(*i)
            }
        }
        SqlValue::Float(f) => Box::new(*f),
        SqlValue::Text(s) => {
            if *ty == Type::UUID {
                Box::new(Uuid::parse_str(s).map_err(|e| {
                    PgError::type_conversion(format!("'{}' is not a valid uuid: {}", s, e))
                })?)
            } else {
                Box::new(s.clone())
            }
        }
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::Timestamp(t) => Box::new(*t),
        SqlValue::Json(j) => Box::new(j.clone()),
    };
    Ok(param)
}

/// Convert a tokio-postgres row into a driver row.
pub(crate) fn convert_row(row: &Row) -> PgResult<SqlRow> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());

    for (idx, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(convert_value(row, idx, base_type(column.type_()))?);
    }

    Ok(SqlRow::new(columns, values))
}

fn convert_value(row: &Row, idx: usize, ty: &Type) -> PgResult<SqlValue> {
    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Boolean)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)?
            .map_or(SqlValue::Null, |i| SqlValue::Integer(i64::from(i)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)?
            .map_or(SqlValue::Null, |i| SqlValue::Integer(i64::from(i)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Integer)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)?
            .map_or(SqlValue::Null, |f| SqlValue::Float(f64::from(f)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Float)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::NAME || *ty == Type::BPCHAR
    {
        row.try_get::<_, Option<String>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Text)
    } else if *ty == Type::UUID {
        row.try_get::<_, Option<Uuid>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Uuid)
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Timestamp)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)?
            .map_or(SqlValue::Null, SqlValue::Json)
    } else {
        return Err(PgError::type_conversion(format!(
            "unsupported column type '{}' at index {}",
            ty, idx
        )));
    };

    Ok(value)
}
