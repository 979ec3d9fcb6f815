use crate::model::{AttendanceStatus, FeeStatus, NotesStatus};
use serde::Serialize;

/// Half-up rounding to one decimal place: `floor(10*x + 0.5) / 10`.
pub fn round_1dp(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Half-up rounding to a whole number.
pub fn round_whole(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

fn ratio_percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64) * 100.0
}

/// Per-student attendance over every stored record.
pub fn attendance_percentage<I>(statuses: I) -> i64
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let mut total = 0usize;
    let mut present = 0usize;
    for s in statuses {
        total += 1;
        if s == AttendanceStatus::Present {
            present += 1;
        }
    }
    round_whole(ratio_percent(present, total))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceStats {
    pub total_students: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub attendance_rate: f64,
}

/// Class-day stats. Students without a record count as absent.
pub fn class_attendance_stats<I>(total_students: usize, statuses: I) -> AttendanceStats
where
    I: IntoIterator<Item = AttendanceStatus>,
{
    let present_count = statuses
        .into_iter()
        .filter(|s| *s == AttendanceStatus::Present)
        .count();
    AttendanceStats {
        total_students,
        present_count,
        absent_count: total_students.saturating_sub(present_count),
        attendance_rate: round_1dp(ratio_percent(present_count, total_students)),
    }
}

/// Mean of a list rounded to one decimal, 0 when empty.
pub fn mean_1dp<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let mut n = 0usize;
    let mut sum = 0.0;
    for v in values {
        n += 1;
        sum += v;
    }
    if n == 0 {
        return 0.0;
    }
    round_1dp(sum / n as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkEntry {
    pub marks_obtained: f64,
    pub is_absent: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamAverage {
    pub avg_marks: f64,
    pub num_students: usize,
}

/// Average over non-absent marks only.
pub fn exam_average<I>(marks: I) -> ExamAverage
where
    I: IntoIterator<Item = MarkEntry>,
{
    let mut num_students = 0usize;
    let mut sum = 0.0;
    for m in marks.into_iter().filter(|m| !m.is_absent) {
        num_students += 1;
        sum += m.marks_obtained;
    }
    let avg = if num_students > 0 {
        sum / num_students as f64
    } else {
        0.0
    };
    ExamAverage {
        avg_marks: round_1dp(avg),
        num_students,
    }
}

pub fn mark_percentage(marks_obtained: f64, total_marks: f64) -> f64 {
    if total_marks <= 0.0 {
        return 0.0;
    }
    marks_obtained / total_marks * 100.0
}

pub fn grade_for(percentage: f64, is_absent: bool) -> &'static str {
    if is_absent {
        return "ABS";
    }
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C+"
    } else if percentage >= 40.0 {
        "C"
    } else {
        "F"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamSummary {
    pub total_students: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub avg_marks: f64,
    pub avg_percentage: f64,
    pub pass_count: usize,
    pub pass_rate: i64,
}

pub fn exam_summary(marks: &[MarkEntry], total_marks: f64, pass_percent: f64) -> ExamSummary {
    let present: Vec<&MarkEntry> = marks.iter().filter(|m| !m.is_absent).collect();
    let present_count = present.len();
    let avg = if present_count > 0 {
        present.iter().map(|m| m.marks_obtained).sum::<f64>() / present_count as f64
    } else {
        0.0
    };
    let pass_count = present
        .iter()
        .filter(|m| mark_percentage(m.marks_obtained, total_marks) >= pass_percent)
        .count();
    ExamSummary {
        total_students: marks.len(),
        present_count,
        absent_count: marks.len() - present_count,
        avg_marks: round_1dp(avg),
        avg_percentage: round_1dp(mark_percentage(avg, total_marks)),
        pass_count,
        pass_rate: round_whole(ratio_percent(pass_count, present_count)),
    }
}

/// Mean of per-exam average percentages across a class.
pub fn average_performance<I>(exams: I) -> i64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let mut n = 0usize;
    let mut sum = 0.0;
    for (avg_marks, total_marks) in exams {
        n += 1;
        sum += mark_percentage(avg_marks, total_marks);
    }
    if n == 0 {
        return 0;
    }
    round_whole(sum / n as f64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChapterFlags {
    pub physical_class_conducted: bool,
    pub chapter_end_test_status: bool,
    pub notes_distribution_status: NotesStatus,
    pub revision_status: bool,
}

impl ChapterFlags {
    pub fn completed(&self) -> bool {
        self.physical_class_conducted
            && self.chapter_end_test_status
            && self.notes_distribution_status == NotesStatus::Distributed
            && self.revision_status
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterProgress {
    pub total_chapters: usize,
    pub completed_chapters: usize,
    pub progress_percentage: i64,
}

pub fn syllabus_progress<I>(chapters: I) -> ChapterProgress
where
    I: IntoIterator<Item = ChapterFlags>,
{
    let mut total_chapters = 0usize;
    let mut completed_chapters = 0usize;
    for c in chapters {
        total_chapters += 1;
        if c.completed() {
            completed_chapters += 1;
        }
    }
    ChapterProgress {
        total_chapters,
        completed_chapters,
        progress_percentage: round_whole(ratio_percent(completed_chapters, total_chapters)),
    }
}

pub fn overall_progress(per_subject: &[i64]) -> i64 {
    if per_subject.is_empty() {
        return 0;
    }
    let sum: i64 = per_subject.iter().sum();
    round_whole(sum as f64 / per_subject.len() as f64)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyFeeStats {
    pub total_students: usize,
    pub paid_count: usize,
    pub pending_count: usize,
    pub overdue_count: usize,
    pub not_started_count: usize,
    pub paid_percentage: f64,
    pub pending_percentage: f64,
    pub total_amount: f64,
    pub collected_amount: f64,
}

pub fn monthly_fee_stats<I>(records: I) -> MonthlyFeeStats
where
    I: IntoIterator<Item = (FeeStatus, f64)>,
{
    let mut stats = MonthlyFeeStats {
        total_students: 0,
        paid_count: 0,
        pending_count: 0,
        overdue_count: 0,
        not_started_count: 0,
        paid_percentage: 0.0,
        pending_percentage: 0.0,
        total_amount: 0.0,
        collected_amount: 0.0,
    };
    for (status, amount) in records {
        stats.total_students += 1;
        stats.total_amount += amount;
        match status {
            FeeStatus::Paid => {
                stats.paid_count += 1;
                stats.collected_amount += amount;
            }
            FeeStatus::Pending => stats.pending_count += 1,
            FeeStatus::Overdue => stats.overdue_count += 1,
            FeeStatus::NotStarted => stats.not_started_count += 1,
        }
    }
    stats.paid_percentage = round_1dp(ratio_percent(stats.paid_count, stats.total_students));
    stats.pending_percentage = round_1dp(ratio_percent(stats.pending_count, stats.total_students));
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use AttendanceStatus::{Absent, Present};

    fn mark(v: f64) -> MarkEntry {
        MarkEntry {
            marks_obtained: v,
            is_absent: false,
        }
    }

    fn absent() -> MarkEntry {
        MarkEntry {
            marks_obtained: 0.0,
            is_absent: true,
        }
    }

    #[test]
    fn rounding_is_half_up() {
        assert_eq!(round_1dp(0.0), 0.0);
        assert_eq!(round_1dp(66.66), 66.7);
        assert_eq!(round_1dp(33.33), 33.3);
        assert_eq!(round_whole(66.5), 67);
        assert_eq!(round_whole(66.49), 66);
    }

    #[test]
    fn attendance_percentage_zero_without_records() {
        assert_eq!(attendance_percentage(Vec::new()), 0);
        assert_eq!(attendance_percentage(vec![Present, Absent, Present]), 67);
        assert_eq!(attendance_percentage(vec![Present, Present]), 100);
    }

    #[test]
    fn class_stats_count_missing_records_as_absent() {
        let s = class_attendance_stats(3, vec![Present]);
        assert_eq!(s.present_count, 1);
        assert_eq!(s.absent_count, 2);
        assert_eq!(s.attendance_rate, 33.3);

        let empty = class_attendance_stats(0, Vec::new());
        assert_eq!(empty.attendance_rate, 0.0);
        assert_eq!(empty.absent_count, 0);
    }

    #[test]
    fn exam_average_ignores_absent_marks() {
        let avg = exam_average(vec![mark(50.0), absent(), mark(75.0)]);
        assert_eq!(avg.num_students, 2);
        assert_eq!(avg.avg_marks, 62.5);
        assert_eq!(exam_average(vec![absent()]).avg_marks, 0.0);
    }

    #[test]
    fn exam_summary_pass_threshold_is_inclusive() {
        let marks = [mark(40.0), mark(39.0), mark(90.0), absent()];
        let s = exam_summary(&marks, 100.0, 40.0);
        assert_eq!(s.total_students, 4);
        assert_eq!(s.present_count, 3);
        assert_eq!(s.absent_count, 1);
        assert_eq!(s.pass_count, 2);
        assert_eq!(s.pass_rate, 67);
        assert_eq!(s.avg_marks, 56.3);
        assert_eq!(s.avg_percentage, 56.3);
    }

    #[test]
    fn exam_summary_all_absent_has_zero_rate() {
        let s = exam_summary(&[absent(), absent()], 50.0, 40.0);
        assert_eq!(s.present_count, 0);
        assert_eq!(s.pass_rate, 0);
        assert_eq!(s.avg_percentage, 0.0);
    }

    #[test]
    fn grades_follow_bands() {
        assert_eq!(grade_for(95.0, false), "A+");
        assert_eq!(grade_for(80.0, false), "A");
        assert_eq!(grade_for(40.0, false), "C");
        assert_eq!(grade_for(39.9, false), "F");
        assert_eq!(grade_for(0.0, true), "ABS");
    }

    #[test]
    fn chapter_needs_all_four_flags() {
        let done = ChapterFlags {
            physical_class_conducted: true,
            chapter_end_test_status: true,
            notes_distribution_status: NotesStatus::Distributed,
            revision_status: true,
        };
        let not_distributed = ChapterFlags {
            notes_distribution_status: NotesStatus::Undistributed,
            ..done
        };
        let no_revision = ChapterFlags {
            revision_status: false,
            ..done
        };
        assert!(done.completed());
        assert!(!not_distributed.completed());
        assert!(!no_revision.completed());

        let p = syllabus_progress(vec![done, not_distributed, no_revision]);
        assert_eq!(p.total_chapters, 3);
        assert_eq!(p.completed_chapters, 1);
        assert_eq!(p.progress_percentage, 33);
        assert_eq!(syllabus_progress(Vec::new()).progress_percentage, 0);
    }

    #[test]
    fn overall_progress_rounds_mean() {
        assert_eq!(overall_progress(&[]), 0);
        assert_eq!(overall_progress(&[50, 75]), 63);
    }

    #[test]
    fn average_performance_uses_percent_of_total() {
        assert_eq!(average_performance(vec![(40.0, 50.0), (30.0, 100.0)]), 55);
        assert_eq!(average_performance(Vec::new()), 0);
    }

    #[test]
    fn fee_stats_collects_only_paid() {
        let s = monthly_fee_stats(vec![
            (FeeStatus::Paid, 100.0),
            (FeeStatus::Pending, 100.0),
            (FeeStatus::Overdue, 50.0),
            (FeeStatus::NotStarted, 50.0),
            (FeeStatus::Paid, 200.0),
            (FeeStatus::Pending, 10.0),
        ]);
        assert_eq!(s.total_students, 6);
        assert_eq!(s.paid_count, 2);
        assert_eq!(s.pending_count, 2);
        assert_eq!(s.overdue_count, 1);
        assert_eq!(s.not_started_count, 1);
        assert_eq!(s.paid_percentage, 33.3);
        assert_eq!(s.pending_percentage, 33.3);
        assert_eq!(s.total_amount, 510.0);
        assert_eq!(s.collected_amount, 300.0);
    }

    #[test]
    fn mean_1dp_of_empty_is_zero() {
        assert_eq!(mean_1dp(Vec::new()), 0.0);
        assert_eq!(mean_1dp(vec![100.0, 67.0, 0.0]), 55.7);
    }
}
