#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use crate::types::TaskReport;

/// Points earned for one task.
///
/// `possible * passed / total`, minus one point per passing case when the
/// compiler emitted any diagnostics, rounded up. The result is not clamped
/// from below.
pub fn score_task(report: &TaskReport) -> i64 {
    if report.outcomes.is_empty() || report.test_case_count == 0 {
        return 0;
    }

    let passed = report.passed_count() as i64;
    let total = report.test_case_count as i64;
    let mut numerator = report.possible * passed;

    if report
        .compile
        .as_ref()
        .is_some_and(|compile| compile.has_diagnostics())
    {
        numerator -= passed * total;
    }

    ceil_div(numerator, total).min(report.possible)
}

/// `numerator / denominator` rounded towards positive infinity, for a
/// positive `denominator`.
fn ceil_div(numerator: i64, denominator: i64) -> i64 {
    let quotient = numerator / denominator;
    if numerator % denominator > 0 {
        quotient + 1
    } else {
        quotient
    }
}

/// Sum of [`score_task`] over all reports.
pub fn score_all(reports: &[TaskReport]) -> i64 {
    reports.iter().map(score_task).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CompileResult, DeclaredTask, TestCase, TestOutcome};

    fn task(points: i64, cases: usize) -> DeclaredTask {
        DeclaredTask::builder()
            .number(1)
            .points(points)
            .tests((0..cases).map(|i| TestCase::builder().expected(i.to_string()).build()))
            .build()
    }

    fn mismatch() -> TestOutcome {
        TestOutcome::Mismatch {
            input:    String::new(),
            expected: "1".into(),
            actual:   "2".into(),
        }
    }

    fn compiled(output: &str) -> Option<CompileResult> {
        Some(CompileResult {
            exit_code: 0,
            output:    output.into(),
            artifact:  Some("/tmp/a.out".into()),
        })
    }

    #[test]
    fn warning_penalty_then_ceiling() {
        let report = TaskReport::submitted(
            &task(10, 4),
            compiled("task1.c:3:5: warning: unused variable 'x'"),
            vec![TestOutcome::Passed, TestOutcome::Passed, TestOutcome::Passed, mismatch()],
        );
        // 10 * 3/4 = 7.5, minus 3, ceiling.
        assert_eq!(score_task(&report), 5);
    }

    #[test]
    fn clean_compile_rounds_up() {
        let report = TaskReport::submitted(
            &task(10, 4),
            compiled(""),
            vec![TestOutcome::Passed, TestOutcome::Passed, TestOutcome::Passed, mismatch()],
        );
        assert_eq!(score_task(&report), 8);
    }

    #[test]
    fn no_outcomes_scores_zero() {
        assert_eq!(score_task(&TaskReport::unsubmitted(&task(10, 4))), 0);

        let failed = TaskReport::submitted(
            &task(10, 4),
            Some(CompileResult {
                exit_code: 1,
                output:    "error: expected ';'".into(),
                artifact:  None,
            }),
            Vec::new(),
        );
        assert_eq!(score_task(&failed), 0);
    }

    #[test]
    fn penalty_is_not_clamped() {
        let report = TaskReport::submitted(
            &task(2, 4),
            compiled("warning"),
            vec![TestOutcome::Passed, TestOutcome::Passed, TestOutcome::Passed, mismatch()],
        );
        // 2 * 3/4 = 1.5, minus 3 = -1.5, ceiling = -1.
        assert_eq!(score_task(&report), -1);
    }

    #[test]
    fn zero_passes_with_warnings_is_at_most_zero() {
        let report = TaskReport::submitted(
            &task(10, 2),
            compiled("warning"),
            vec![mismatch(), mismatch()],
        );
        assert!(score_task(&report) <= 0);
    }

    #[test]
    fn whole_scores_are_not_rounded_up() {
        let mut outcomes = vec![TestOutcome::Passed; 9];
        outcomes.extend(std::iter::repeat_with(mismatch).take(5));
        let report = TaskReport::submitted(&task(42, 14), compiled(""), outcomes);
        // 42 * 9/14 = 27 exactly.
        assert_eq!(score_task(&report), 27);

        for (points, passed, cases, expected) in [(77, 9, 11, 63), (85, 3, 17, 15)] {
            let mut outcomes = vec![TestOutcome::Passed; passed];
            outcomes.extend(std::iter::repeat_with(mismatch).take(cases - passed));
            let report = TaskReport::submitted(&task(points, cases), compiled(""), outcomes);
            assert_eq!(score_task(&report), expected, "{points} points, {passed}/{cases}");
        }
    }

    #[test]
    fn negative_penalised_score_rounds_towards_zero() {
        let mut outcomes = vec![TestOutcome::Passed; 9];
        outcomes.extend(std::iter::repeat_with(mismatch).take(5));
        let report = TaskReport::submitted(&task(5, 14), compiled("warning"), outcomes);
        // 5 * 9/14 = 3.21..., minus 9 = -5.78..., ceiling = -5.
        assert_eq!(score_task(&report), -5);

        let report = TaskReport::submitted(
            &task(14, 14),
            compiled("warning"),
            vec![TestOutcome::Passed; 14],
        );
        // 14 - 14 = 0 exactly.
        assert_eq!(score_task(&report), 0);
    }

    #[test]
    fn never_exceeds_declared_points() {
        for cases in 1..6 {
            for points in 0..15 {
                let report = TaskReport::submitted(
                    &task(points, cases),
                    compiled(""),
                    vec![TestOutcome::Passed; cases],
                );
                assert!(score_task(&report) <= points);
            }
        }
    }
}
