//! Record sorting: comparator policies, the parallel in-memory sort, and the
//! external merge sort.

pub mod external;
pub mod keys;
pub mod parallel;

pub use external::{ExternalSorter, SortStats};
pub use keys::{CoordinateKey, QuerynameKey, SortKey, SortOrder};
pub use parallel::parallel_sort;
