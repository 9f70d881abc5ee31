use crate::cli::RoleArg;
use crate::commands::Context;
use agentfleet::model::User;

pub async fn issue(ctx: &Context, user: &str, role: RoleArg) -> anyhow::Result<()> {
    let user = User {
        id: uuid::Uuid::new_v4().to_string(),
        username: user.to_string(),
        role: role.into(),
        active: true,
    };
    ctx.state.users.upsert(user.clone()).await;
    let pair = ctx.state.tokens.generate_token_pair(&user).await?;
    println!("User id:       {}", user.id);
    println!("Access token:  {}", pair.access_token);
    println!("Refresh token: {}", pair.refresh_token);
    println!("Access expires at:  {}", pair.access_token_expires_at);
    println!("Refresh expires at: {}", pair.refresh_token_expires_at);
    Ok(())
}

pub async fn deactivate(ctx: &Context, user_id: &str) -> anyhow::Result<()> {
    if ctx.state.users.set_active(user_id, false).await {
        println!("User {user_id} deactivated.");
        Ok(())
    } else {
        anyhow::bail!("no such user: {user_id}")
    }
}

pub async fn verify(ctx: &Context, token: &str) -> anyhow::Result<()> {
    let claims = ctx.state.tokens.validate(token).await?;
    println!("Subject ......... {}", claims.sub);
    println!("Username ........ {}", claims.username);
    println!("Role ............ {:?}", claims.role);
    println!("Token type ...... {:?}", claims.token_type);
    println!("Issued at ....... {}", claims.iat);
    println!("Expires at ...... {}", claims.exp);
    Ok(())
}
