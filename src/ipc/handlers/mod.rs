pub mod academics;
pub mod attendance;
pub mod core;
pub mod events;
pub mod exams;
pub mod fees;
pub mod setup;
pub mod students;
pub mod syllabus;
pub mod users;
