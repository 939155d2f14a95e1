//! Result codes and the error types returned by the timer API.
use core::fmt;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use ostimer::ResultCode;
            /// assert_eq!(ResultCode::NotScheduled.as_str(), "NotScheduled");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that the timer API can produce.
    ///
    /// The numeric values are stable so that they can be passed through a C
    /// interface unchanged.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful. No additional information is available.
        Success = 0,
        /// A parameter is out of range.
        BadParam = -17,
        /// The current context disallows the operation. This is reported when
        /// a kernel critical section would be reentered.
        BadContext = -25,
        /// The timer is already in the timer list.
        AlreadyScheduled = -40,
        /// The timer is not in the timer list.
        NotScheduled = -41,
        /// The mailbox already holds a message.
        QueueOverflow = -43,
        /// The mailbox holds no message.
        QueueEmpty = -44,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    ///
    /// Success codes have non-negative values.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                // Use the same discriminants as `ResultCode`
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $( $name::$vname => Self::$vname, )*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname as i8,
                        ResultCode::from($name::$vname) as i8,
                    );
                )*
            }

            #[test]
            fn result_to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from(Err($name::$vname)),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }
    };
}

define_error! {
    mod start_timer_error {}
    /// Error type for [`TimerEntry::start`].
    ///
    /// [`TimerEntry::start`]: crate::TimerEntry::start
    pub enum StartTimerError {
        /// A kernel critical section would be reentered.
        BadContext,
        /// The delay or the interval exceeds [`MAX_DELAY`].
        ///
        /// [`MAX_DELAY`]: crate::MAX_DELAY
        BadParam,
        /// The timer is already running.
        AlreadyScheduled,
    }
}

define_error! {
    mod stop_timer_error {}
    /// Error type for [`TimerEntry::stop`].
    ///
    /// [`TimerEntry::stop`]: crate::TimerEntry::stop
    pub enum StopTimerError {
        /// A kernel critical section would be reentered.
        BadContext,
        /// The timer is not running. Either it was never started, it was
        /// already stopped, or it was a one-shot timer that has fired.
        NotScheduled,
    }
}

define_error! {
    mod set_timer_interval_error {}
    /// Error type for [`TimerEntry::set_interval`].
    ///
    /// [`TimerEntry::set_interval`]: crate::TimerEntry::set_interval
    pub enum SetTimerIntervalError {
        /// A kernel critical section would be reentered.
        BadContext,
        /// The interval exceeds [`MAX_DELAY`].
        ///
        /// [`MAX_DELAY`]: crate::MAX_DELAY
        BadParam,
    }
}

define_error! {
    mod get_remaining_error {}
    /// Error type for [`TimerEntry::remaining`].
    ///
    /// [`TimerEntry::remaining`]: crate::TimerEntry::remaining
    pub enum GetRemainingError {
        /// A kernel critical section would be reentered.
        BadContext,
        /// The timer is not running.
        NotScheduled,
    }
}

define_error! {
    mod send_error {}
    /// Error type for [`Mailbox::send`].
    ///
    /// [`Mailbox::send`]: crate::Mailbox::send
    pub enum SendError {
        /// A kernel critical section would be reentered.
        BadContext,
        /// The mailbox is full. The message was not stored.
        QueueOverflow,
    }
}

define_error! {
    mod recv_error {}
    /// Error type for [`Mailbox::try_recv`].
    ///
    /// [`Mailbox::try_recv`]: crate::Mailbox::try_recv
    pub enum RecvError {
        /// A kernel critical section would be reentered.
        BadContext,
        /// The mailbox is empty.
        QueueEmpty,
    }
}

define_error! {
    mod set_error_message_error {}
    /// Error type for [`FaultNotifier::set_error_message`].
    ///
    /// [`FaultNotifier::set_error_message`]: crate::fault::FaultNotifier::set_error_message
    pub enum SetErrorMessageError {
        /// A kernel critical section would be reentered.
        BadContext,
    }
}

macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:path )] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ResultCode::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        define_suberror! {
            @into
            #[into(ResultCode)]
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:path )]
        $( #[into( $Supererror:path )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

define_suberror! {
    /// `BadContext`
    #[into(StartTimerError)]
    #[into(StopTimerError)]
    #[into(SetTimerIntervalError)]
    #[into(GetRemainingError)]
    #[into(SendError)]
    #[into(RecvError)]
    #[into(SetErrorMessageError)]
    pub(crate) enum BadContextError {
        BadContext,
    }
}

define_suberror! {
    /// `BadParam`
    #[into(StartTimerError)]
    #[into(SetTimerIntervalError)]
    pub(crate) enum BadParamError {
        BadParam,
    }
}
