use chrono::{Datelike, NaiveDate, NaiveTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("{field} must be one of: {allowed}")]
    InvalidChoice {
        field: &'static str,
        allowed: &'static str,
    },
    #[error("{field} must be a date in YYYY-MM-DD format")]
    InvalidDate { field: &'static str },
    #[error("{field} must be a month in YYYY-MM format")]
    InvalidMonth { field: &'static str },
    #[error("{field} must be a time in HH:MM format")]
    InvalidTime { field: &'static str },
}

/// Closed string vocabularies stored as TEXT columns.
macro_rules! text_enum {
    ($name:ident, $field:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALLOWED: &'static str = concat!($($text, ", "),+);

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }

            pub fn parse(s: &str) -> Result<Self, ModelError> {
                match s.trim() {
                    $($text => Ok(Self::$variant),)+
                    _ => Err(ModelError::InvalidChoice {
                        field: $field,
                        allowed: Self::ALLOWED.trim_end_matches(", "),
                    }),
                }
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                Self::parse(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

text_enum!(AttendanceStatus, "status", {
    Present => "present",
    Absent => "absent",
});

text_enum!(FeeStatus, "status", {
    Paid => "paid",
    Pending => "pending",
    Overdue => "overdue",
    NotStarted => "not started",
});

text_enum!(Role, "role", {
    Admin => "admin",
    Teacher => "teacher",
});

text_enum!(EventType, "eventType", {
    Ptm => "PTM",
    Exam => "Exam",
    Holiday => "Holiday",
    Meeting => "Meeting",
    Workshop => "Workshop",
    Sports => "Sports",
    Cultural => "Cultural",
    Other => "Other",
});

text_enum!(Reminder, "reminder", {
    OnTime => "On time",
    FifteenMinutes => "15 minutes before",
    ThirtyMinutes => "30 minutes before",
    OneHour => "1 hour before",
    OneDay => "1 day before",
});

text_enum!(NotesStatus, "notesDistributionStatus", {
    Distributed => "Distributed",
    Undistributed => "Undistributed",
});

pub fn parse_date(field: &'static str, s: &str) -> Result<NaiveDate, ModelError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| ModelError::InvalidDate { field })
}

pub fn parse_time(field: &'static str, s: &str) -> Result<NaiveTime, ModelError> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").map_err(|_| ModelError::InvalidTime { field })
}

/// `YYYY-MM` -> (year, month 1..=12).
pub fn parse_month_key(field: &'static str, s: &str) -> Result<(i32, u32), ModelError> {
    let t = s.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(ModelError::InvalidMonth { field });
    };
    if y.len() != 4 || m.len() != 2 {
        return Err(ModelError::InvalidMonth { field });
    }
    let year = y.parse::<i32>().map_err(|_| ModelError::InvalidMonth { field })?;
    let month = m.parse::<u32>().map_err(|_| ModelError::InvalidMonth { field })?;
    if !(1..=12).contains(&month) {
        return Err(ModelError::InvalidMonth { field });
    }
    Ok((year, month))
}

/// Today's date in UTC; month keys and paid dates use the same clock.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

pub fn month_name(month: u32) -> &'static str {
    match month {
        1 => "January",
        2 => "February",
        3 => "March",
        4 => "April",
        5 => "May",
        6 => "June",
        7 => "July",
        8 => "August",
        9 => "September",
        10 => "October",
        11 => "November",
        12 => "December",
        _ => "",
    }
}

/// First and last day of a month, or None for an out-of-range month.
pub fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, NaiveDate)> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some((first, next.pred_opt()?))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub address: Option<String>,
    #[serde(rename = "class")]
    pub class_name: String,
    pub attendance: i64,
    pub fee_status: FeeStatus,
    pub fee_amount: f64,
    pub enrollment_date: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub date: String,
    pub status: AttendanceStatus,
    #[serde(rename = "class")]
    pub class_name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceWithStudent {
    pub id: String,
    pub student_id: String,
    pub student_name: String,
    pub date: String,
    pub status: AttendanceStatus,
    #[serde(rename = "class")]
    pub class_name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub subject: String,
    pub total_marks: f64,
    pub exam_date: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamWithStats {
    #[serde(flatten)]
    pub exam: Exam,
    pub avg_marks: f64,
    pub num_students: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamMarkWithStudent {
    pub id: String,
    pub exam_id: String,
    pub student_id: String,
    pub student_name: String,
    pub student_class: String,
    pub marks_obtained: f64,
    pub is_absent: bool,
    pub percentage: f64,
    pub grade: &'static str,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecord {
    pub id: String,
    pub student_id: String,
    pub month: String,
    pub year: i32,
    pub month_name: String,
    pub amount: f64,
    pub status: FeeStatus,
    pub due_date: String,
    pub paid_date: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeRecordWithStudent {
    #[serde(flatten)]
    pub record: FeeRecord,
    pub student_name: String,
    pub student_class: String,
    pub student_email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyllabusChapter {
    pub id: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub subject: String,
    pub chapter_name: String,
    pub physical_class_conducted: bool,
    pub chapter_end_test_status: bool,
    pub notes_distribution_status: NotesStatus,
    pub revision_status: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub event_type: EventType,
    pub event_date: String,
    pub event_time: String,
    pub reminder: Reminder,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppUser {
    pub id: String,
    pub full_name: String,
    pub email: String,
    pub contact_number: String,
    pub role: Role,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}
