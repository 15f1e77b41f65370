macro_rules! define_inner_service_accessors {
    () => {
        /// Gets a reference to the underlying service.
        pub fn get_ref(&self) -> &S {
            &self.inner
        }

        /// Gets a mutable reference to the underlying service.
        pub fn get_mut(&mut self) -> &mut S {
            &mut self.inner
        }

        /// Consumes `self`, returning the underlying service.
        pub fn into_inner(self) -> S {
            self.inner
        }
    };
}

// Tracing requires the level of an event to be known statically, so we match on
// it and expand one `event!` per level.
macro_rules! event_dynamic_lvl {
    ( $level:expr, $($tt:tt)* ) => {
        match $level {
            tracing::Level::ERROR => {
                tracing::event!(tracing::Level::ERROR, $($tt)*);
            }
            tracing::Level::WARN => {
                tracing::event!(tracing::Level::WARN, $($tt)*);
            }
            tracing::Level::INFO => {
                tracing::event!(tracing::Level::INFO, $($tt)*);
            }
            tracing::Level::DEBUG => {
                tracing::event!(tracing::Level::DEBUG, $($tt)*);
            }
            tracing::Level::TRACE => {
                tracing::event!(tracing::Level::TRACE, $($tt)*);
            }
        }
    };
}
