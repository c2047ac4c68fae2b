//! Grid binding: paging/sort collaborators and the data source

pub mod paginator;
pub mod sort;
pub mod source;

pub use paginator::{PageState, Paginator};
pub use sort::{
    default_sorting_data_accessor, SortControl, SortState, SortValue, SortingDataAccessor,
};
pub use source::{GridDataSource, GridSourceOptions};
