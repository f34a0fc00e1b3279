pub(crate) mod answers;
pub(crate) mod attempts;
pub(crate) mod enrollments;
pub(crate) mod exams;
pub(crate) mod scoring;
