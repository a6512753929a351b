use crate::{
    error::ValidationError,
    toggle::{
        DateTimeOp, DateTimeOperator, FloatOp, IntOp, KeyType, NumericOperator, Operation, Rule,
        StringOp, StringOperator,
    },
    AttributeValue, Attributes,
};

/// Evaluate `rules` against `attributes`, returning `true` as soon as one of them matches.
///
/// Rules whose attribute is absent are skipped. A present attribute of the wrong type, or a
/// malformed rule, is an error rather than a mismatch.
pub(crate) fn match_rules(
    toggle: &str,
    rules: &[Rule],
    attributes: Option<&Attributes>,
) -> Result<bool, ValidationError> {
    for rule in rules {
        if rule.eval(toggle, attributes)? {
            return Ok(true);
        }
    }
    Ok(false)
}

impl Rule {
    fn eval(&self, toggle: &str, attributes: Option<&Attributes>) -> Result<bool, ValidationError> {
        let key = &self.key.key;
        if key.is_empty() {
            return Err(ValidationError::InvalidMatchKey {
                toggle: toggle.to_owned(),
            });
        }

        let Some(attribute) = attributes.and_then(|attributes| attributes.get(key)) else {
            return Ok(false);
        };

        let ctx = RuleContext {
            toggle,
            key,
            key_type: self.key.key_type,
        };

        match (self.key.key_type, attribute, &self.operation) {
            (KeyType::Unknown, _, _) => Err(ValidationError::UnknownKeyType {
                toggle: toggle.to_owned(),
                key: key.clone(),
            }),

            (KeyType::Boolean, AttributeValue::Boolean(value), Some(Operation::BoolOp(op))) => {
                Ok(op.value == *value)
            }
            (KeyType::Boolean, AttributeValue::Boolean(_), _) => Err(ctx.missing_operation()),

            (KeyType::String, AttributeValue::String(value), Some(Operation::StringOp(op))) => {
                op.eval(&ctx, value)
            }
            (KeyType::String, AttributeValue::String(_), _) => Err(ctx.missing_operation()),

            (KeyType::Float, value, operation) => {
                let value = value.as_float().ok_or_else(|| ctx.type_mismatch())?;
                match operation {
                    Some(Operation::FloatOp(op)) => op.eval(&ctx, value),
                    _ => Err(ctx.missing_operation()),
                }
            }

            (KeyType::Int, value, operation) => {
                let value = value.as_integer().ok_or_else(|| ctx.type_mismatch())?;
                match operation {
                    Some(Operation::IntOp(op)) => op.eval(&ctx, value),
                    _ => Err(ctx.missing_operation()),
                }
            }

            (KeyType::DateTime, AttributeValue::DateTime(value), Some(Operation::DateTimeOp(op))) => {
                op.eval(&ctx, value)
            }
            (KeyType::DateTime, AttributeValue::DateTime(_), _) => Err(ctx.missing_operation()),

            (KeyType::Boolean | KeyType::String | KeyType::DateTime, _, _) => {
                Err(ctx.type_mismatch())
            }
        }
    }
}

struct RuleContext<'a> {
    toggle: &'a str,
    key: &'a str,
    key_type: KeyType,
}

impl RuleContext<'_> {
    fn type_mismatch(&self) -> ValidationError {
        ValidationError::TypeMismatch {
            toggle: self.toggle.to_owned(),
            key: self.key.to_owned(),
            expected: self.key_type,
        }
    }

    fn missing_operation(&self) -> ValidationError {
        ValidationError::MissingOperation {
            toggle: self.toggle.to_owned(),
            key: self.key.to_owned(),
            expected: self.key_type,
        }
    }

    fn missing_values(&self) -> ValidationError {
        ValidationError::MissingValues {
            toggle: self.toggle.to_owned(),
            key: self.key.to_owned(),
        }
    }

    /// Return the only operand of `values`.
    fn single<'v, T>(&self, values: &'v [T]) -> Result<&'v T, ValidationError> {
        match values {
            [] => Err(self.missing_values()),
            [value] => Ok(value),
            _ => Err(ValidationError::ExpectedSingleValue {
                toggle: self.toggle.to_owned(),
                key: self.key.to_owned(),
            }),
        }
    }
}

impl StringOp {
    fn eval(&self, ctx: &RuleContext, value: &str) -> Result<bool, ValidationError> {
        if self.values.is_empty() {
            return Err(ctx.missing_values());
        }
        Ok(match self.op {
            StringOperator::In => self.values.iter().any(|v| v == value),
            StringOperator::Eq => ctx.single(&self.values)? == value,
            StringOperator::Contains => value.contains(ctx.single(&self.values)?.as_str()),
        })
    }
}

impl FloatOp {
    fn eval(&self, ctx: &RuleContext, value: f64) -> Result<bool, ValidationError> {
        compare(ctx, self.op, &self.values, value)
    }
}

impl IntOp {
    fn eval(&self, ctx: &RuleContext, value: i64) -> Result<bool, ValidationError> {
        compare(ctx, self.op, &self.values, value)
    }
}

fn compare<T: PartialOrd>(
    ctx: &RuleContext,
    op: NumericOperator,
    values: &[T],
    value: T,
) -> Result<bool, ValidationError> {
    if values.is_empty() {
        return Err(ctx.missing_values());
    }
    Ok(match op {
        NumericOperator::In => values.iter().any(|v| *v == value),
        NumericOperator::Eq => value == *ctx.single(values)?,
        NumericOperator::Neq => value != *ctx.single(values)?,
        NumericOperator::Gt => value > *ctx.single(values)?,
        NumericOperator::Gte => value >= *ctx.single(values)?,
        NumericOperator::Lt => value < *ctx.single(values)?,
        NumericOperator::Lte => value <= *ctx.single(values)?,
    })
}

impl DateTimeOp {
    fn eval(
        &self,
        ctx: &RuleContext,
        value: &crate::toggle::Timestamp,
    ) -> Result<bool, ValidationError> {
        let timestamp = self.timestamp.as_ref().ok_or_else(|| ctx.missing_values())?;
        Ok(match self.op {
            DateTimeOperator::After => value > timestamp,
            DateTimeOperator::Before => value < timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::match_rules;
    use crate::{
        error::ValidationError,
        toggle::{
            BoolOp, DateTimeOp, DateTimeOperator, FloatOp, IntOp, Key, KeyType, NumericOperator,
            Operation, Rule, StringOp, StringOperator, Timestamp,
        },
        Attributes,
    };

    fn created_at() -> Timestamp {
        // 2019-10-12T07:20:50.52Z
        Utc.timestamp_millis_opt(1_570_864_850_520).unwrap()
    }

    fn attributes() -> Attributes {
        [
            ("user_id".to_owned(), 123.0.into()),
            ("company_id".to_owned(), 123i64.into()),
            ("company_slug".to_owned(), "FeatureGuards".into()),
            ("is_admin".to_owned(), true.into()),
            ("created_at".to_owned(), created_at().into()),
        ]
        .into_iter()
        .collect()
    }

    fn rule(key: &str, key_type: KeyType, operation: Operation) -> Rule {
        Rule {
            key: Key {
                key: key.to_owned(),
                key_type,
            },
            operation: Some(operation),
        }
    }

    fn string_rule(op: StringOperator, values: &[&str]) -> Rule {
        rule(
            "company_slug",
            KeyType::String,
            Operation::StringOp(StringOp {
                op,
                values: values.iter().map(|s| s.to_string()).collect(),
            }),
        )
    }

    fn float_rule(op: NumericOperator, values: &[f64]) -> Rule {
        rule(
            "user_id",
            KeyType::Float,
            Operation::FloatOp(FloatOp {
                op,
                values: values.to_vec(),
            }),
        )
    }

    fn int_rule(key: &str, op: NumericOperator, values: &[i64]) -> Rule {
        rule(
            key,
            KeyType::Int,
            Operation::IntOp(IntOp {
                op,
                values: values.to_vec(),
            }),
        )
    }

    fn date_rule(op: DateTimeOperator, timestamp: Timestamp) -> Rule {
        rule(
            "created_at",
            KeyType::DateTime,
            Operation::DateTimeOp(DateTimeOp {
                op,
                timestamp: Some(timestamp),
            }),
        )
    }

    fn eval(rule: Rule) -> Result<bool, ValidationError> {
        match_rules("FOO", &[rule], Some(&attributes()))
    }

    #[test]
    fn string_eq() {
        assert!(eval(string_rule(StringOperator::Eq, &["FeatureGuards"])).unwrap());
        assert!(!eval(string_rule(StringOperator::Eq, &["featureguards"])).unwrap());
        assert!(!eval(string_rule(StringOperator::Eq, &[""])).unwrap());
    }

    #[test]
    fn string_contains() {
        assert!(eval(string_rule(StringOperator::Contains, &["Guards"])).unwrap());
        assert!(!eval(string_rule(StringOperator::Contains, &["guards"])).unwrap());
    }

    #[test]
    fn string_in() {
        assert!(eval(string_rule(StringOperator::In, &["foo", "FeatureGuards"])).unwrap());
        assert!(!eval(string_rule(StringOperator::In, &["foo", "featureguards"])).unwrap());
    }

    #[test]
    fn string_eq_requires_single_value() {
        assert_eq!(
            eval(string_rule(StringOperator::Eq, &["a", "b"])),
            Err(ValidationError::ExpectedSingleValue {
                toggle: "FOO".to_owned(),
                key: "company_slug".to_owned(),
            })
        );
        assert!(eval(string_rule(StringOperator::In, &[])).is_err());
    }

    #[test]
    fn boolean_eq() {
        let bool_rule =
            |value| rule("is_admin", KeyType::Boolean, Operation::BoolOp(BoolOp { value }));
        assert!(eval(bool_rule(true)).unwrap());
        assert!(!eval(bool_rule(false)).unwrap());
    }

    #[test]
    fn float_operators() {
        assert!(eval(float_rule(NumericOperator::Eq, &[123.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::Eq, &[1234.0])).unwrap());
        assert!(eval(float_rule(NumericOperator::Neq, &[1234.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::Neq, &[123.0])).unwrap());
        assert!(eval(float_rule(NumericOperator::Gt, &[122.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::Gt, &[123.0])).unwrap());
        assert!(eval(float_rule(NumericOperator::Gte, &[123.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::Gte, &[124.0])).unwrap());
        assert!(eval(float_rule(NumericOperator::Lt, &[124.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::Lt, &[123.0])).unwrap());
        assert!(eval(float_rule(NumericOperator::Lte, &[123.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::Lte, &[122.0])).unwrap());
        assert!(eval(float_rule(NumericOperator::In, &[1.0, 123.0])).unwrap());
        assert!(!eval(float_rule(NumericOperator::In, &[1.0, 1234.0])).unwrap());
    }

    #[test]
    fn float_accepts_int_attribute() {
        let mut rule = float_rule(NumericOperator::Gte, &[100.0]);
        rule.key.key = "company_id".to_owned();
        assert_eq!(eval(rule), Ok(true));

        let mut rule = float_rule(NumericOperator::In, &[1.0, 123.0]);
        rule.key.key = "company_id".to_owned();
        assert_eq!(eval(rule), Ok(true));

        let attributes: Attributes = [("big".to_owned(), ((1i64 << 53) + 1).into())]
            .into_iter()
            .collect();
        let mut rule = float_rule(NumericOperator::Gt, &[0.0]);
        rule.key.key = "big".to_owned();
        assert!(matches!(
            match_rules("FOO", &[rule], Some(&attributes)),
            Err(ValidationError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn float_gt_requires_single_value() {
        assert!(matches!(
            eval(float_rule(NumericOperator::Gt, &[1.0, 2.0])),
            Err(ValidationError::ExpectedSingleValue { .. })
        ));
        assert!(matches!(
            eval(float_rule(NumericOperator::Gt, &[])),
            Err(ValidationError::MissingValues { .. })
        ));
    }

    #[test]
    fn int_operators() {
        for key in ["company_id", "user_id"] {
            assert!(eval(int_rule(key, NumericOperator::Eq, &[123])).unwrap());
            assert!(!eval(int_rule(key, NumericOperator::Eq, &[1234])).unwrap());
            assert!(eval(int_rule(key, NumericOperator::Neq, &[1234])).unwrap());
            assert!(eval(int_rule(key, NumericOperator::Gt, &[122])).unwrap());
            assert!(!eval(int_rule(key, NumericOperator::Gt, &[123])).unwrap());
            assert!(eval(int_rule(key, NumericOperator::Gte, &[123])).unwrap());
            assert!(eval(int_rule(key, NumericOperator::Lt, &[124])).unwrap());
            assert!(!eval(int_rule(key, NumericOperator::Lte, &[122])).unwrap());
            assert!(eval(int_rule(key, NumericOperator::In, &[1, 123])).unwrap());
            assert!(!eval(int_rule(key, NumericOperator::In, &[1, 1234])).unwrap());
        }
    }

    #[test]
    fn int_rejects_fractional_float() {
        let attributes: Attributes = [("score".to_owned(), 1.5.into())].into_iter().collect();
        let result = match_rules(
            "FOO",
            &[int_rule("score", NumericOperator::Eq, &[1])],
            Some(&attributes),
        );
        assert!(matches!(result, Err(ValidationError::TypeMismatch { .. })));
    }

    #[test]
    fn date_time_operators() {
        let at = created_at();
        assert!(eval(date_rule(DateTimeOperator::After, at - Duration::seconds(20))).unwrap());
        assert!(!eval(date_rule(DateTimeOperator::After, at + Duration::seconds(1))).unwrap());
        assert!(eval(date_rule(DateTimeOperator::Before, at + Duration::seconds(1))).unwrap());
        assert!(!eval(date_rule(DateTimeOperator::Before, at)).unwrap());
        assert!(!eval(date_rule(DateTimeOperator::After, at)).unwrap());
    }

    #[test]
    fn missing_attributes_do_not_match() {
        let rules = [
            int_rule("missing", NumericOperator::Eq, &[1]),
            string_rule(StringOperator::Eq, &["FeatureGuards"]),
        ];
        assert!(!match_rules("FOO", &rules, None).unwrap());
        assert!(!match_rules("FOO", &rules, Some(&Attributes::new())).unwrap());
        assert!(!match_rules("FOO", &[], Some(&attributes())).unwrap());
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = [
            string_rule(StringOperator::Eq, &["nope"]),
            float_rule(NumericOperator::Gt, &[100.0]),
            // Would fail validation if it was evaluated.
            float_rule(NumericOperator::Gt, &[1.0, 2.0]),
        ];
        assert!(match_rules("FOO", &rules, Some(&attributes())).unwrap());
    }

    #[test]
    fn wrong_attribute_type() {
        let mut rule = string_rule(StringOperator::Eq, &["FeatureGuards"]);
        rule.key.key = "company_id".to_owned();
        assert_eq!(
            eval(rule),
            Err(ValidationError::TypeMismatch {
                toggle: "FOO".to_owned(),
                key: "company_id".to_owned(),
                expected: KeyType::String,
            })
        );
    }

    #[test]
    fn operation_must_match_key_type() {
        let mut rule = string_rule(StringOperator::Eq, &["FeatureGuards"]);
        rule.operation = Some(Operation::BoolOp(BoolOp { value: true }));
        assert!(matches!(eval(rule), Err(ValidationError::MissingOperation { .. })));

        let mut rule = string_rule(StringOperator::Eq, &["FeatureGuards"]);
        rule.operation = None;
        assert!(matches!(eval(rule), Err(ValidationError::MissingOperation { .. })));
    }

    #[test]
    fn empty_key_is_invalid() {
        let mut rule = string_rule(StringOperator::Eq, &["FeatureGuards"]);
        rule.key.key = String::new();
        assert_eq!(
            eval(rule),
            Err(ValidationError::InvalidMatchKey {
                toggle: "FOO".to_owned()
            })
        );
    }

    #[test]
    fn unknown_key_type_is_invalid() {
        let mut rule = string_rule(StringOperator::Eq, &["FeatureGuards"]);
        rule.key.key_type = KeyType::Unknown;
        assert!(matches!(eval(rule), Err(ValidationError::UnknownKeyType { .. })));
    }
}
