//! Data models for the lending engine

pub mod copy;
pub mod enums;
pub mod fine;
pub mod loan;
pub mod query;
pub mod reservation;
pub mod user;

// Re-export commonly used types
pub use copy::{Book, BookCopy, CopyDetails, CopyFilter};
pub use enums::{CopyStatus, LoanAction, LoanStatus, ReservationStatus};
pub use fine::{Fine, FineDetails, FineFilter, NewFine};
pub use loan::{Loan, LoanDetails, LoanFilter, LoanHistory, LoanRecord, NewLoan, NewLoanHistory};
pub use query::{ListParams, SortDirection};
pub use reservation::{NewReservation, Reservation, ReservationDetails, ReservationFilter};
pub use user::User;
