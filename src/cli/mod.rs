mod doctor;
mod status;

pub use doctor::run_doctor;
pub use status::print_status;
