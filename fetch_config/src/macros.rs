/// Macro to create a configuration value group struct.
///
/// Usage:
/// ```rust
/// use fetch_config::config_group;
///
/// mod test_group {
///     fetch_config::config_group!({
///         ref test_int: usize = 42;
///         ref test_string: String = "default".to_string();
///     });
/// }
/// ```
///
/// This creates a `ConfigValueGroup` struct with the specified fields and an
/// `apply_env_overrides` method that loads values from environment variables
/// named `WEAVE_<GROUP>_<FIELD>`, where the group name comes from the
/// declaring module.
#[macro_export]
macro_rules! config_group {
    ({
        $(
            $(#[$meta:meta])*
            ref $name:ident : $type:ty = $value:expr;
        )+
    }) => {
        #[allow(unused_imports)]
        use $crate::ParsableConfigValue;

        /// ConfigValueGroup struct containing all configurable values
        #[derive(Debug, Clone)]
        pub struct ConfigValueGroup {
            $(
                $(#[$meta])*
                pub $name: $type,
            )+
        }

        impl Default for ConfigValueGroup {
            /// Create a new instance with default values only (no environment
            /// variable overrides).
            fn default() -> Self {
                Self {
                    $(
                        $name: {
                            let v: $type = $value;
                            v
                        },
                    )+
                }
            }
        }

        impl AsRef<ConfigValueGroup> for ConfigValueGroup {
            fn as_ref(&self) -> &ConfigValueGroup {
                self
            }
        }

        impl ConfigValueGroup {
            pub fn new() -> Self {
                Self::default()
            }

            /// Apply environment variable overrides to this configuration
            /// group. The group name is derived from the module path, e.g. in
            /// `fetch_config::groups::stream` the env var for `max_parallel`
            /// is `WEAVE_STREAM_MAX_PARALLEL`.
            pub fn apply_env_overrides(&mut self) {
                $(
                    {
                        const ENV_VAR_NAME: &str = const_str::concat!(
                            "WEAVE_",
                            const_str::convert_ascii_case!(upper, konst::string::rsplit_once(module_path!(), "::").unwrap().1),
                            "_",
                            const_str::convert_ascii_case!(upper, stringify!($name)));

                        let maybe_env_value = std::env::var(ENV_VAR_NAME).ok();

                        let default_value: $type = $value;
                        self.$name = <$type>::parse(stringify!($name), maybe_env_value, default_value);
                    }
                )+
            }
        }

        /// Type alias for easier reference in config aggregation
        pub(crate) type ConfigValues = ConfigValueGroup;
    };
}
