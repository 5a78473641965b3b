mod copy;
mod pool;
mod registry;
mod stream;
