use chrono::{Datelike, NaiveDate};
use fredpipe::{
    assert_schema_compatible, build_transform_schema, column_diff, frame_from_records,
    lag_column_name, transform_for_serving, transform_for_training, FeatureRecord, Frame,
    IndicatorColumn, IndicatorValues, TransformConfig, TransformError, MONTH_COLUMN,
    QUARTER_COLUMN, TARGET_COLUMN,
};

fn month_start(offset: u32) -> NaiveDate {
    let year = 2020 + (offset / 12) as i32;
    NaiveDate::from_ymd_opt(year, offset % 12 + 1, 1).expect("valid month start")
}

fn records(count: u32) -> Vec<FeatureRecord> {
    (0..count)
        .map(|i| {
            let date = month_start(i);
            FeatureRecord {
                id: date.format("%Y-%m-%d").to_string(),
                date,
                values: IndicatorValues::new(
                    3.5 + f64::from(i) * 0.1,
                    250.0 + f64::from(i),
                    0.25 * f64::from(i % 4),
                    19_000.0 + 10.0 * f64::from(i),
                ),
            }
        })
        .collect()
}

fn raw_frame(count: u32) -> Frame {
    frame_from_records(&records(count), IndicatorColumn::Cpi)
}

#[test]
fn fewer_rows_than_the_largest_lag_yield_an_empty_frame() {
    let out = transform_for_training(&raw_frame(5), &TransformConfig::default()).expect("transform");
    assert!(out.is_empty());
    assert_eq!(out.columns.len(), 4 + 4 * 3 + 2);
}

#[test]
fn ten_rows_keep_positions_seven_through_ten() {
    let input = raw_frame(10);
    let out = transform_for_training(&input, &TransformConfig::default()).expect("transform");

    assert_eq!(out.len(), 4);
    let kept: Vec<NaiveDate> = out.rows.iter().map(|row| row.date).collect();
    let expected: Vec<NaiveDate> = (6..10).map(month_start).collect();
    assert_eq!(kept, expected);
}

#[test]
fn output_layout_is_inputs_then_lags_then_calendar() {
    let cfg = TransformConfig::default();
    let out = transform_for_training(&raw_frame(8), &cfg).expect("transform");

    assert_eq!(out.columns[0], TARGET_COLUMN);
    assert_eq!(
        out.columns.len(),
        raw_frame(0).columns.len() + cfg.base_columns.len() * cfg.lags.len() + 2
    );
    for lag in &cfg.lags {
        for base in &cfg.base_columns {
            assert!(
                out.column_index(&lag_column_name(base, *lag)).is_some(),
                "missing {base} lag {lag}"
            );
        }
    }
    assert_eq!(out.columns[out.columns.len() - 2], MONTH_COLUMN);
    assert_eq!(out.columns[out.columns.len() - 1], QUARTER_COLUMN);
    assert!(out.column_index("cpi").is_none());
}

#[test]
fn lag_values_point_back_the_right_number_of_rows() {
    let input = raw_frame(9);
    let out = transform_for_training(&input, &TransformConfig::default()).expect("transform");

    let target = out.column(TARGET_COLUMN).expect("target");
    let lag1 = out.column(&lag_column_name(TARGET_COLUMN, 1)).expect("lag 1");
    let lag6 = out.column(&lag_column_name(TARGET_COLUMN, 6)).expect("lag 6");
    let gdp_lag3 = out.column(&lag_column_name("gdp", 3)).expect("gdp lag 3");

    // CPI rises by exactly one per month in the fixture.
    for idx in 0..out.len() {
        assert_eq!(lag1[idx], target[idx] - 1.0);
        assert_eq!(lag6[idx], target[idx] - 6.0);
    }
    assert_eq!(gdp_lag3[0], 19_000.0 + 10.0 * 3.0);
}

#[test]
fn calendar_columns_follow_the_row_date() {
    let out = transform_for_training(&raw_frame(24), &TransformConfig::default()).expect("transform");
    let months = out.column(MONTH_COLUMN).expect("month");
    let quarters = out.column(QUARTER_COLUMN).expect("quarter");

    for (idx, row) in out.rows.iter().enumerate() {
        assert_eq!(months[idx], f64::from(row.date.month()));
        assert_eq!(quarters[idx], f64::from((row.date.month() - 1) / 3 + 1));
    }
}

#[test]
fn transform_is_deterministic_and_leaves_input_untouched() {
    let input = raw_frame(15);
    let before = input.clone();
    let cfg = TransformConfig::default();

    let first = transform_for_training(&input, &cfg).expect("first");
    let second = transform_for_training(&input, &cfg).expect("second");

    assert_eq!(first, second);
    assert_eq!(input, before);
}

#[test]
fn rows_with_missing_values_are_dropped() {
    let mut recs = records(12);
    recs[9].values.set(IndicatorColumn::Gdp, f64::NAN);
    let input = frame_from_records(&recs, IndicatorColumn::Cpi);

    let out = transform_for_training(&input, &TransformConfig::default()).expect("transform");
    // Row 9 itself and row 10, whose gdp_lag_1 reaches it.
    let kept: Vec<NaiveDate> = out.rows.iter().map(|row| row.date).collect();
    assert_eq!(
        kept,
        vec![month_start(6), month_start(7), month_start(8), month_start(11)]
    );
}

#[test]
fn training_and_serving_share_one_transform() {
    let input = raw_frame(20);
    let cfg = TransformConfig::default();

    let training = transform_for_training(&input, &cfg).expect("training");
    let serving = transform_for_serving(&input, &cfg).expect("serving");
    assert_eq!(training, serving);

    let schema = build_transform_schema(&input.columns, &cfg).expect("schema");
    assert_eq!(schema.columns, training.columns);
    assert!(assert_schema_compatible(schema.version, &schema.fingerprint, &schema).is_ok());
}

#[test]
fn diverging_serving_config_is_detected() {
    let input = raw_frame(20);
    let training_cfg = TransformConfig::default();
    let serving_cfg = TransformConfig {
        lags: vec![1, 3],
        ..TransformConfig::default()
    };

    let training = build_transform_schema(&input.columns, &training_cfg).expect("training");
    let serving = build_transform_schema(&input.columns, &serving_cfg).expect("serving");

    let err = assert_schema_compatible(training.version, &training.fingerprint, &serving)
        .expect_err("fingerprints differ");
    assert!(matches!(err, TransformError::SchemaFingerprintMismatch { .. }));

    let diff = column_diff(&training.columns, &serving.columns);
    assert!(!diff.is_empty());
    assert!(diff.only_left.contains(&lag_column_name(TARGET_COLUMN, 6)));
    assert!(diff.only_right.is_empty());
}

#[test]
fn unknown_base_column_is_rejected() {
    let cfg = TransformConfig {
        base_columns: vec!["housing_starts".to_string()],
        ..TransformConfig::default()
    };
    assert_eq!(
        transform_for_training(&raw_frame(10), &cfg),
        Err(TransformError::UnknownColumn("housing_starts".to_string()))
    );
}
