pub mod async_task;

pub mod convert;

pub mod time;

#[cfg(test)]
mod convert_test;
